use serde::Serialize;

/// One analysis result from the real-time signal path.
///
/// `frequency_hz == 0.0` with `confidence == 0.0` is the unvoiced result.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AnalysisFrame {
    pub frequency_hz: f32,
    /// Detection confidence (0.0-1.0)
    pub confidence: f32,
    /// RMS energy of the window (linear)
    pub energy_rms: f32,
    /// Brightness proxy (Hz)
    pub spectral_centroid_hz: f32,
    /// Playback-clock time of the window centre
    pub timestamp: f64,
}

impl AnalysisFrame {
    pub fn is_voiced(&self) -> bool {
        self.frequency_hz > 0.0 && self.confidence > 0.0
    }
}

/// Pitch estimate for a single window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PitchEstimate {
    pub frequency_hz: f32,
    pub confidence: f32,
}

impl PitchEstimate {
    pub const UNVOICED: PitchEstimate = PitchEstimate {
        frequency_hz: 0.0,
        confidence: 0.0,
    };
}

/// Result of reading one capture block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockRead {
    /// A full block was written; `playback` tells whether the playback buffer holds data
    Block { playback: bool },
    EndOfStream,
}
