use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::capture::{CaptureSource, StreamFormat};
use crate::audio::features::{AnalysisFrame, BlockRead};
use crate::audio::signal::SignalPath;
use crate::config::EngineConfig;
use crate::engine::{LiveScore, ScoringEngine};
use crate::error::{CaptureError, Result};
use crate::reference::ReferenceTrack;
use crate::scoring::SessionReport;

/// Counters returned by the real-time thread when it exits.
#[derive(Debug, Default)]
struct CaptureStats {
    blocks: u64,
    frames_sent: u64,
    dropped: u64,
    error: Option<CaptureError>,
}

/// Handle to the real-time thread. Dropping it stops and joins the thread.
struct CaptureWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<CaptureStats>>,
}

impl CaptureWorker {
    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn shutdown(&mut self) -> CaptureStats {
        self.stop.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return CaptureStats::default();
        };
        handle.join().unwrap_or_else(|_| {
            log::error!("Capture thread panicked");
            CaptureStats::default()
        })
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A running performance: capture and signal path on a dedicated thread,
/// scoring on the caller's thread. The two only share the frame channel and
/// a stop flag.
pub struct LiveSession {
    engine: ScoringEngine,
    frames: Receiver<AnalysisFrame>,
    worker: CaptureWorker,
}

impl LiveSession {
    /// Validate, open the capture source and start the real-time thread.
    /// Nothing is spawned if any of that fails.
    pub fn start(
        config: &EngineConfig,
        reference: Arc<ReferenceTrack>,
        mut capture: Box<dyn CaptureSource>,
        start_time: f64,
    ) -> Result<Self> {
        let engine = ScoringEngine::new(config, reference)?;

        let format = StreamFormat {
            sample_rate: config.audio.sample_rate,
            block_size: config.audio.block_size,
        };
        capture.open(&format)?;

        let with_playback = capture.has_playback() && config.echo.enabled;
        if !capture.has_playback() {
            log::warn!("No playback stream; echo cancellation disabled");
        }
        let path = SignalPath::new(config, with_playback, start_time);

        let (tx, rx) = bounded(config.audio.channel_capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let block_size = config.audio.block_size;
        let handle = thread::Builder::new()
            .name("karaoke-capture".into())
            .spawn(move || run_capture(capture, path, tx, flag, block_size))?;

        log::info!(
            "Session started at {:.2}s ({} Hz, block {}, echo {})",
            start_time,
            format.sample_rate,
            format.block_size,
            if with_playback { "on" } else { "off" }
        );

        Ok(Self {
            engine,
            frames: rx,
            worker: CaptureWorker {
                stop,
                handle: Some(handle),
            },
        })
    }

    /// Score every frame that has arrived since the last call.
    pub fn pump(&mut self) -> Vec<LiveScore> {
        let mut scores = Vec::new();
        for frame in self.frames.try_iter() {
            if let Some(score) = self.engine.process(&frame) {
                scores.push(score);
            }
        }
        scores
    }

    /// False once the capture source has run dry or failed.
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Stop capture, score what is still queued and produce the report.
    pub fn stop(mut self) -> SessionReport {
        let stats = self.worker.shutdown();
        self.pump();

        if let Some(err) = &stats.error {
            log::warn!("Capture ended with an error: {}", err);
        }
        log::info!(
            "Capture stopped: {} blocks, {} frames sent, {} dropped",
            stats.blocks,
            stats.frames_sent,
            stats.dropped
        );

        self.engine.finish(stats.dropped)
    }
}

/// Run a capture source to its end on the calling thread, scoring every
/// frame as it is produced. Deterministic: no frames are dropped.
pub fn run_to_end(
    config: &EngineConfig,
    reference: Arc<ReferenceTrack>,
    capture: &mut dyn CaptureSource,
    start_time: f64,
    mut on_score: impl FnMut(&LiveScore),
) -> Result<SessionReport> {
    let mut engine = ScoringEngine::new(config, reference)?;
    let format = StreamFormat {
        sample_rate: config.audio.sample_rate,
        block_size: config.audio.block_size,
    };
    capture.open(&format)?;
    let with_playback = capture.has_playback() && config.echo.enabled;
    let mut path = SignalPath::new(config, with_playback, start_time);

    let mut mic = vec![0.0f32; format.block_size];
    let mut playback = vec![0.0f32; format.block_size];
    loop {
        let has_playback = match capture.read_block(&mut mic, &mut playback)? {
            BlockRead::Block { playback } => playback,
            BlockRead::EndOfStream => break,
        };
        let reference = if has_playback { Some(playback.as_slice()) } else { None };
        if let Some(frame) = path.process_block(&mic, reference) {
            if let Some(score) = engine.process(&frame) {
                on_score(&score);
            }
        }
    }
    Ok(engine.finish(0))
}

fn run_capture(
    mut capture: Box<dyn CaptureSource>,
    mut path: SignalPath,
    frames: Sender<AnalysisFrame>,
    stop: Arc<AtomicBool>,
    block_size: usize,
) -> CaptureStats {
    let mut stats = CaptureStats::default();
    let mut mic = vec![0.0f32; block_size];
    let mut playback = vec![0.0f32; block_size];

    while !stop.load(Ordering::Acquire) {
        let has_playback = match capture.read_block(&mut mic, &mut playback) {
            Ok(BlockRead::Block { playback }) => playback,
            Ok(BlockRead::EndOfStream) => break,
            Err(err) => {
                stats.error = Some(err);
                break;
            }
        };
        stats.blocks += 1;

        let reference = if has_playback { Some(playback.as_slice()) } else { None };
        let Some(frame) = path.process_block(&mic, reference) else {
            continue;
        };
        match frames.try_send(frame) {
            Ok(()) => stats.frames_sent += 1,
            Err(TrySendError::Full(_)) => stats.dropped += 1,
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::FileCapture;
    use crate::audio::decode::DecodedAudio;
    use crate::reference::ExpectedPitch;
    use std::time::Duration;

    fn sine(freq: f32, seconds: f32) -> DecodedAudio {
        let n = (48_000.0 * seconds) as usize;
        DecodedAudio {
            samples: (0..n)
                .map(|i| 0.4 * (2.0 * std::f32::consts::PI * freq * i as f32 / 48_000.0).sin())
                .collect(),
            sample_rate: 48_000,
        }
    }

    fn reference(hz: f32) -> Arc<ReferenceTrack> {
        let pitch = vec![ExpectedPitch { frequency_hz: hz, confidence: 1.0 }; 100];
        Arc::new(ReferenceTrack::new(50.0, pitch, Vec::new(), Vec::new()).unwrap())
    }

    struct NoMicrophone;

    impl CaptureSource for NoMicrophone {
        fn open(&mut self, _: &StreamFormat) -> std::result::Result<(), CaptureError> {
            Err(CaptureError::NoDevice)
        }

        fn has_playback(&self) -> bool {
            false
        }

        fn read_block(&mut self, _: &mut [f32], _: &mut [f32]) -> std::result::Result<BlockRead, CaptureError> {
            Ok(BlockRead::EndOfStream)
        }
    }

    #[test]
    fn capture_failure_is_reported_at_start() {
        let err = LiveSession::start(
            &EngineConfig::default(),
            reference(440.0),
            Box::new(NoMicrophone),
            0.0,
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            crate::error::EngineError::Capture(CaptureError::NoDevice)
        ));
    }

    #[test]
    fn runs_file_capture_to_completion() {
        let capture = FileCapture::new(sine(440.0, 1.5), None);
        let mut session =
            LiveSession::start(&EngineConfig::default(), reference(440.0), Box::new(capture), 0.0)
                .unwrap();

        let mut live = Vec::new();
        while session.is_running() {
            live.extend(session.pump());
            thread::sleep(Duration::from_millis(2));
        }
        let report = session.stop();

        assert!(live.len() as u64 <= report.frames.scored + report.frames.unscored);
        assert!(report.frames.scored > 0);
        assert!(report.pitch_score.unwrap() > 0.8);
        assert_eq!(report.frames.rejected, 0);
    }

    #[test]
    fn offline_run_scores_every_frame() {
        let mut capture = FileCapture::new(sine(440.0, 1.5), None);
        let mut seen = 0u64;
        let report = run_to_end(
            &EngineConfig::default(),
            reference(440.0),
            &mut capture,
            0.0,
            |_| seen += 1,
        )
        .unwrap();
        assert_eq!(seen, report.frames.scored + report.frames.unscored);
        assert_eq!(report.frames.dropped, 0);
        assert!(report.median_cents_error.unwrap().abs() < 5.0);
    }

    #[test]
    fn dropping_a_session_stops_the_thread() {
        let capture = FileCapture::new(sine(300.0, 30.0), None).paced(true);
        let session =
            LiveSession::start(&EngineConfig::default(), reference(300.0), Box::new(capture), 0.0)
                .unwrap();
        assert!(session.is_running());
        drop(session);
    }

    #[test]
    fn full_channel_drops_frames_and_counts_them() {
        let mut config = EngineConfig::default();
        config.audio.channel_capacity = 2;
        let audio = sine(440.0, 2.0);
        let blocks = audio.samples.len().div_ceil(config.audio.block_size) as u64;
        let window_blocks = (config.audio.analysis_window / config.audio.block_size) as u64;
        let interval = config.audio.analysis_interval_blocks as u64;
        let produced = (blocks - window_blocks) / interval + 1;

        let session =
            LiveSession::start(&config, reference(440.0), Box::new(FileCapture::new(audio, None)), 0.0)
                .unwrap();
        // Nobody drains the channel while capture runs
        while session.is_running() {
            thread::sleep(Duration::from_millis(2));
        }
        let report = session.stop();

        let counts = &report.frames;
        assert!(counts.dropped > 0);
        assert!(counts.scored <= 2);
        assert_eq!(counts.rejected, 0);
        assert_eq!(counts.scored + counts.unscored + counts.dropped, produced);
    }
}
