use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use super::decode::{decode_mono, DecodedAudio};
use super::features::BlockRead;
use crate::error::{CaptureError, Result};

/// Format the engine expects from a capture source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub block_size: usize,
}

/// The audio-capture boundary: a microphone stream plus, optionally, the
/// signal being played back (for echo cancellation).
///
/// `read_block` runs on the real-time thread. Implementations wait for the
/// device cadence themselves; they must not wait on the scoring side.
pub trait CaptureSource: Send {
    fn open(&mut self, format: &StreamFormat) -> std::result::Result<(), CaptureError>;

    fn has_playback(&self) -> bool;

    /// Fill `mic` (and `playback` when available) with exactly one block.
    /// Both buffers are `format.block_size` long; a short final block is
    /// zero-padded by the source rather than returned truncated.
    fn read_block(
        &mut self,
        mic: &mut [f32],
        playback: &mut [f32],
    ) -> std::result::Result<BlockRead, CaptureError>;
}

/// Capture source backed by recordings held in memory.
pub struct FileCapture {
    mic: DecodedAudio,
    playback: Option<DecodedAudio>,
    position: usize,
    paced: bool,
    block_duration: Duration,
    next_deadline: Option<Instant>,
}

impl FileCapture {
    pub fn new(mic: DecodedAudio, playback: Option<DecodedAudio>) -> Self {
        Self {
            mic,
            playback,
            position: 0,
            paced: false,
            block_duration: Duration::ZERO,
            next_deadline: None,
        }
    }

    pub fn from_files(mic: &Path, playback: Option<&Path>) -> Result<Self> {
        let mic = decode_mono(mic)?;
        let playback = playback.map(decode_mono).transpose()?;
        Ok(Self::new(mic, playback))
    }

    /// Deliver blocks at the rate a live device would.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn duration(&self) -> f64 {
        self.mic.duration()
    }
}

impl CaptureSource for FileCapture {
    fn open(&mut self, format: &StreamFormat) -> std::result::Result<(), CaptureError> {
        if self.mic.samples.is_empty() {
            return Err(CaptureError::Stream("microphone recording is empty".into()));
        }
        if self.mic.sample_rate != format.sample_rate {
            return Err(CaptureError::Unsupported(format!(
                "microphone recorded at {} Hz, engine runs at {} Hz",
                self.mic.sample_rate, format.sample_rate
            )));
        }
        if let Some(playback) = &self.playback {
            if playback.sample_rate != format.sample_rate {
                return Err(CaptureError::Unsupported(format!(
                    "playback recorded at {} Hz, engine runs at {} Hz",
                    playback.sample_rate, format.sample_rate
                )));
            }
        }
        self.position = 0;
        self.block_duration =
            Duration::from_secs_f64(format.block_size as f64 / format.sample_rate as f64);
        self.next_deadline = None;
        Ok(())
    }

    fn has_playback(&self) -> bool {
        self.playback.is_some()
    }

    fn read_block(
        &mut self,
        mic: &mut [f32],
        playback: &mut [f32],
    ) -> std::result::Result<BlockRead, CaptureError> {
        if self.position >= self.mic.samples.len() {
            return Ok(BlockRead::EndOfStream);
        }

        if self.paced {
            let deadline = self.next_deadline.unwrap_or_else(Instant::now) + self.block_duration;
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
            self.next_deadline = Some(deadline);
        }

        copy_padded(&self.mic.samples, self.position, mic);
        let has_playback = match &self.playback {
            Some(track) => {
                copy_padded(&track.samples, self.position, playback);
                true
            }
            None => false,
        };
        self.position += mic.len();

        Ok(BlockRead::Block {
            playback: has_playback,
        })
    }
}

/// Copy `out.len()` samples starting at `start`, zero-filling past the end.
fn copy_padded(source: &[f32], start: usize, out: &mut [f32]) {
    let available = source.len().saturating_sub(start).min(out.len());
    out[..available].copy_from_slice(&source[start..start + available]);
    out[available..].iter_mut().for_each(|s| *s = 0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(samples: Vec<f32>, sample_rate: u32) -> DecodedAudio {
        DecodedAudio {
            samples,
            sample_rate,
        }
    }

    const FORMAT: StreamFormat = StreamFormat {
        sample_rate: 48_000,
        block_size: 4,
    };

    #[test]
    fn reads_blocks_and_pads_the_tail() {
        let mut capture = FileCapture::new(audio(vec![1.0; 6], 48_000), Some(audio(vec![0.5; 3], 48_000)));
        capture.open(&FORMAT).unwrap();
        let mut mic = [0.0; 4];
        let mut playback = [0.0; 4];

        assert_eq!(capture.read_block(&mut mic, &mut playback), Ok(BlockRead::Block { playback: true }));
        assert_eq!(mic, [1.0; 4]);
        assert_eq!(playback, [0.5, 0.5, 0.5, 0.0]);

        assert_eq!(capture.read_block(&mut mic, &mut playback), Ok(BlockRead::Block { playback: true }));
        assert_eq!(mic, [1.0, 1.0, 0.0, 0.0]);
        assert_eq!(playback, [0.0; 4]);

        assert_eq!(capture.read_block(&mut mic, &mut playback), Ok(BlockRead::EndOfStream));
    }

    #[test]
    fn rejects_sample_rate_mismatch() {
        let mut capture = FileCapture::new(audio(vec![0.0; 10], 44_100), None);
        assert!(matches!(capture.open(&FORMAT), Err(CaptureError::Unsupported(_))));
    }

    #[test]
    fn rejects_empty_recording() {
        let mut capture = FileCapture::new(audio(Vec::new(), 48_000), None);
        assert!(matches!(capture.open(&FORMAT), Err(CaptureError::Stream(_))));
        assert!(!capture.has_playback());
    }
}
