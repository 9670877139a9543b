use super::echo::EchoCanceller;
use super::features::AnalysisFrame;
use super::pitch::PitchExtractor;
use crate::config::EngineConfig;

/// The real-time half of the engine: echo cancellation followed by throttled
/// pitch/energy extraction. Nothing here allocates after construction.
pub struct SignalPath {
    canceller: EchoCanceller,
    extractor: PitchExtractor,
    /// Ring of the most recent cleaned samples
    history: Vec<f32>,
    write_pos: usize,
    filled: usize,
    /// Linearized copy of `history` handed to the extractor
    window: Vec<f32>,
    cleaned: Vec<f32>,
    blocks_since_frame: usize,
    interval_blocks: usize,
    samples_processed: u64,
    sample_rate: f64,
    start_time: f64,
    latency: f64,
}

impl SignalPath {
    /// `with_playback` selects whether the echo canceller runs at all.
    /// `start_time` is the playback position of the first captured sample.
    pub fn new(config: &EngineConfig, with_playback: bool, start_time: f64) -> Self {
        let canceller = if with_playback {
            EchoCanceller::new(&config.echo)
        } else {
            EchoCanceller::passthrough()
        };
        let window_len = config.audio.analysis_window;

        Self {
            canceller,
            extractor: PitchExtractor::new(config),
            history: vec![0.0; window_len],
            write_pos: 0,
            filled: 0,
            window: vec![0.0; window_len],
            cleaned: vec![0.0; config.audio.block_size],
            blocks_since_frame: 0,
            interval_blocks: config.audio.analysis_interval_blocks,
            samples_processed: 0,
            sample_rate: config.audio.sample_rate as f64,
            start_time,
            latency: config.audio.latency_compensation_seconds,
        }
    }

    pub fn echo_active(&self) -> bool {
        self.canceller.is_active()
    }

    /// Feed one capture block of at most `block_size` samples. Returns a frame
    /// every `analysis_interval_blocks` blocks once the analysis window has filled.
    pub fn process_block(&mut self, mic: &[f32], playback: Option<&[f32]>) -> Option<AnalysisFrame> {
        debug_assert!(
            mic.len() <= self.cleaned.len(),
            "capture block of {} samples exceeds block size {}",
            mic.len(),
            self.cleaned.len()
        );
        let len = mic.len().min(self.cleaned.len());
        self.canceller
            .process_block(&mic[..len], playback, &mut self.cleaned[..len]);

        let capacity = self.history.len();
        for &sample in &self.cleaned[..len] {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % capacity;
        }
        self.filled = (self.filled + len).min(capacity);
        self.samples_processed += len as u64;

        self.blocks_since_frame += 1;
        if self.blocks_since_frame < self.interval_blocks || self.filled < capacity {
            return None;
        }
        self.blocks_since_frame = 0;

        // Oldest sample sits at write_pos
        let (tail, head) = self.history.split_at(self.write_pos);
        self.window[..head.len()].copy_from_slice(head);
        self.window[head.len()..].copy_from_slice(tail);

        let centre = self.samples_processed as f64 - capacity as f64 / 2.0;
        let timestamp = self.start_time + centre / self.sample_rate - self.latency;
        Some(self.extractor.analyze(&self.window, timestamp))
    }

    /// Playback time of the newest processed sample.
    pub fn position(&self) -> f64 {
        self.start_time + self.samples_processed as f64 / self.sample_rate
    }
}
