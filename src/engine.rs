use serde::Serialize;
use std::sync::Arc;

use crate::audio::features::AnalysisFrame;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::reference::{ReferenceResolver, ReferenceTrack};
use crate::scoring::smooth::cents_between;
use crate::scoring::{
    ComboState, ComboTracker, ContinuousScorer, KeyShiftEstimator, PitchInput, ScoreSample,
    SessionAccumulator, SessionReport,
};

/// What the display receives after each scored frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LiveScore {
    pub sample: ScoreSample,
    /// Pitch meter value. Present whenever the reference covers the frame,
    /// including instrumental stretches where `sample.pitch` is `None`.
    pub display_pitch: Option<f32>,
    pub display_energy: Option<f32>,
    pub combo: ComboState,
    pub key_shift_cents: f32,
    pub nearest_beat: Option<f64>,
    pub nearest_downbeat: Option<f64>,
}

/// The scoring context: reference lookup, key-shift tracking, scoring,
/// combo and accumulation, applied to frames in timestamp order.
pub struct ScoringEngine {
    resolver: ReferenceResolver,
    key_shift: KeyShiftEstimator,
    key_shift_min_confidence: f32,
    scorer: ContinuousScorer,
    combo: ComboTracker,
    accumulator: SessionAccumulator,
    last_timestamp: Option<f64>,
    rejected: u64,
}

impl ScoringEngine {
    pub fn new(config: &EngineConfig, track: Arc<ReferenceTrack>) -> Result<Self> {
        config.validate()?;
        let resolver = ReferenceResolver::new(track);
        let phrases = resolver.track().phrases().to_vec();

        Ok(Self {
            key_shift: KeyShiftEstimator::new(&config.key_shift),
            key_shift_min_confidence: config.key_shift.min_confidence,
            scorer: ContinuousScorer::new(&config.scoring, resolver.loudness_range()),
            combo: ComboTracker::new(&config.combo),
            accumulator: SessionAccumulator::new(config, phrases),
            resolver,
            last_timestamp: None,
            rejected: 0,
        })
    }

    /// Score one frame. Frames not strictly after the previous one are rejected.
    pub fn process(&mut self, frame: &AnalysisFrame) -> Option<LiveScore> {
        let ts = frame.timestamp;
        let in_order = ts.is_finite() && self.last_timestamp.map_or(true, |last| ts > last);
        if !in_order {
            self.rejected += 1;
            log::debug!(
                "Rejected out-of-order frame at {:.3}s (last {:?})",
                ts,
                self.last_timestamp
            );
            return None;
        }
        self.last_timestamp = Some(ts);

        let reference = self.resolver.resolve(ts);
        let (sample, display) = match reference {
            None => (ScoreSample::unscored(ts), None),
            Some(expected) => {
                let raw = cents_between(frame.frequency_hz, expected.expected_frequency_hz);
                if let Some(raw) = raw {
                    if frame.confidence >= self.key_shift_min_confidence {
                        self.key_shift.push(raw);
                    }
                }
                let cents_error = raw.map(|c| self.key_shift.correct(c));

                let pitch = self.scorer.score_pitch(PitchInput {
                    cents_error,
                    confidence: frame.confidence,
                    measured_hz: frame.frequency_hz,
                    expected_hz: expected.expected_frequency_hz,
                });
                let energy = self
                    .scorer
                    .score_energy(frame.energy_rms, expected.expected_loudness_db);

                // Instrumental stretch: shown on the meters, kept out of every aggregate
                let sample = if expected.expected_frequency_hz > 0.0 {
                    ScoreSample {
                        timestamp: ts,
                        pitch: Some(pitch),
                        energy: Some(energy),
                        combined: self.scorer.combine(Some(pitch), Some(energy)),
                        cents_error,
                    }
                } else {
                    ScoreSample::unscored(ts)
                };
                (sample, Some((pitch, energy)))
            }
        };

        let combo = self.combo.update(ts, sample.combined);
        self.accumulator.push(sample, &combo);

        Some(LiveScore {
            sample,
            display_pitch: display.map(|(pitch, _)| pitch),
            display_energy: display.map(|(_, energy)| energy),
            combo,
            key_shift_cents: self.key_shift.offset(),
            nearest_beat: reference.and_then(|r| r.nearest_beat),
            nearest_downbeat: reference.and_then(|r| r.nearest_downbeat),
        })
    }

    pub fn rejected_frames(&self) -> u64 {
        self.rejected
    }

    /// Produce the session report. `dropped_frames` comes from the real-time side.
    pub fn finish(self, dropped_frames: u64) -> SessionReport {
        self.accumulator
            .finalize(self.rejected, dropped_frames, self.key_shift.offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringConfig;
    use crate::reference::ExpectedPitch;

    fn gapped_track() -> Arc<ReferenceTrack> {
        let voiced = ExpectedPitch {
            frequency_hz: 440.0,
            confidence: 1.0,
        };
        let mut pitch = vec![voiced; 50];
        pitch.extend(vec![ExpectedPitch::default(); 50]);
        Arc::new(ReferenceTrack::new(50.0, pitch, Vec::new(), Vec::new()).unwrap())
    }

    fn track(seconds: f64, hz: f32) -> Arc<ReferenceTrack> {
        let frames = (seconds * 50.0) as usize;
        let pitch = vec![
            ExpectedPitch {
                frequency_hz: hz,
                confidence: 1.0,
            };
            frames
        ];
        Arc::new(ReferenceTrack::new(50.0, pitch, Vec::new(), vec![0.5, 1.0, 1.5]).unwrap())
    }

    fn frame(t: f64, hz: f32, confidence: f32) -> AnalysisFrame {
        AnalysisFrame {
            frequency_hz: hz,
            confidence,
            energy_rms: 0.3,
            spectral_centroid_hz: 1000.0,
            timestamp: t,
        }
    }

    #[test]
    fn matching_pitch_scores_near_one() {
        let mut engine = ScoringEngine::new(&EngineConfig::default(), track(3.0, 440.0)).unwrap();
        for i in 0..149 {
            let live = engine.process(&frame(0.01 + 0.02 * i as f64, 440.0, 1.0)).unwrap();
            assert_eq!(live.sample.cents_error, Some(0.0));
            assert!(live.sample.pitch.unwrap() > 0.99);
        }
        let report = engine.finish(0);
        assert!(report.pitch_score.unwrap() > 0.99);
        assert_eq!(report.median_cents_error, Some(0.0));
        assert_eq!(report.key_shift_cents, 0.0);
        assert!(report.max_streak > 100);
    }

    #[test]
    fn out_of_order_frames_are_rejected() {
        let mut engine = ScoringEngine::new(&EngineConfig::default(), track(3.0, 440.0)).unwrap();
        assert!(engine.process(&frame(1.0, 440.0, 1.0)).is_some());
        assert!(engine.process(&frame(0.5, 440.0, 1.0)).is_none());
        assert!(engine.process(&frame(1.0, 440.0, 1.0)).is_none());
        assert!(engine.process(&frame(f64::NAN, 440.0, 1.0)).is_none());
        assert!(engine.process(&frame(1.1, 440.0, 1.0)).is_some());
        assert_eq!(engine.rejected_frames(), 3);

        let report = engine.finish(5);
        assert_eq!(report.frames.rejected, 3);
        assert_eq!(report.frames.dropped, 5);
        assert_eq!(report.frames.scored, 2);
    }

    #[test]
    fn frames_outside_reference_are_unscored() {
        let mut engine = ScoringEngine::new(&EngineConfig::default(), track(1.0, 440.0)).unwrap();
        let live = engine.process(&frame(2.0, 440.0, 1.0)).unwrap();
        assert_eq!(live.sample.combined, None);
        assert_eq!(live.nearest_beat, None);
        assert_eq!(live.display_pitch, None);
        let report = engine.finish(0);
        assert_eq!(report.frames.unscored, 1);
        assert_eq!(report.total_score, None);
    }

    #[test]
    fn octave_shift_is_partially_compensated() {
        let mut engine = ScoringEngine::new(&EngineConfig::default(), track(3.0, 220.0)).unwrap();
        let mut last = None;
        for i in 0..30 {
            last = engine.process(&frame(0.02 * (i + 1) as f64, 440.0, 0.9));
        }
        let live = last.unwrap();
        assert!(live.key_shift_cents > 150.0);
        assert!(live.sample.cents_error.unwrap() < 1100.0);
    }

    #[test]
    fn low_confidence_frames_do_not_move_key_shift() {
        let mut engine = ScoringEngine::new(&EngineConfig::default(), track(3.0, 220.0)).unwrap();
        for i in 0..30 {
            engine.process(&frame(0.02 * (i + 1) as f64, 440.0, 0.2));
        }
        assert_eq!(engine.finish(0).key_shift_cents, 0.0);
    }

    #[test]
    fn invalid_config_fails_before_scoring() {
        let mut config = EngineConfig::default();
        config.audio.sample_rate = 0;
        assert!(ScoringEngine::new(&config, track(1.0, 440.0)).is_err());
    }

    #[test]
    fn instrumental_frames_show_on_meters_but_are_not_aggregated() {
        let mut engine = ScoringEngine::new(&EngineConfig::default(), gapped_track()).unwrap();
        for i in 0..49 {
            let live = engine.process(&frame(0.01 + 0.02 * i as f64, 440.0, 1.0)).unwrap();
            assert!(live.sample.pitch.unwrap() > 0.99);
        }
        let floor = ScoringConfig::default().floor;
        for i in 50..99 {
            let mut rest = frame(0.02 * i as f64, 0.0, 0.0);
            rest.energy_rms = 0.0;
            let live = engine.process(&rest).unwrap();
            assert_eq!(live.sample.pitch, None);
            assert_eq!(live.sample.combined, None);
            assert!((live.display_pitch.unwrap() - floor).abs() < 1e-6);
            assert!(live.display_energy.is_some());
        }

        let report = engine.finish(0);
        assert!(report.pitch_score.unwrap() > 0.99);
        assert!(report.total_score.unwrap() > 0.9);
        assert_eq!(report.frames.scored, 49);
        assert_eq!(report.frames.unscored, 49);
        assert!(report.max_streak >= 40);
    }
}
