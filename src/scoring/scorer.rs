use serde::Serialize;

use super::smooth::{logistic, soft_onset, unit_gate, RollingWindow};
use crate::config::ScoringConfig;

const DB_FLOOR: f32 = -120.0;

/// Scores for one analysis frame. `None` means the frame could not be scored
/// and is left out of every aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScoreSample {
    pub timestamp: f64,
    pub pitch: Option<f32>,
    pub energy: Option<f32>,
    pub combined: Option<f32>,
    /// Key-shift-corrected cents error, when both pitches were voiced
    pub cents_error: Option<f32>,
}

impl ScoreSample {
    pub fn unscored(timestamp: f64) -> Self {
        Self {
            timestamp,
            pitch: None,
            energy: None,
            combined: None,
            cents_error: None,
        }
    }
}

/// Inputs to the pitch score for one frame.
#[derive(Clone, Copy, Debug)]
pub struct PitchInput {
    /// Corrected cents error; `None` unless both pitches are voiced
    pub cents_error: Option<f32>,
    pub confidence: f32,
    pub measured_hz: f32,
    pub expected_hz: f32,
}

/// Maps measured/expected pairs onto `[floor, 1]` with no discontinuities.
#[derive(Debug, Clone)]
pub struct ContinuousScorer {
    config: ScoringConfig,
    errors: RollingWindow,
    /// Quietest/loudest audible frame seen this session (dB)
    level_range: Option<(f32, f32)>,
    reference_range: Option<(f32, f32)>,
}

pub fn amplitude_to_db(rms: f32) -> f32 {
    if rms > 0.0 {
        (20.0 * rms.log10()).max(DB_FLOOR)
    } else {
        DB_FLOOR
    }
}

impl ContinuousScorer {
    /// `reference_range` is the quietest/loudest reference loudness, used to
    /// place the expected loudness on the same 0-1 scale as the singer.
    pub fn new(config: &ScoringConfig, reference_range: Option<(f32, f32)>) -> Self {
        Self {
            config: config.clone(),
            errors: RollingWindow::new(config.smoothing_window),
            level_range: None,
            reference_range,
        }
    }

    pub fn score_pitch(&mut self, input: PitchInput) -> f32 {
        let c = &self.config;
        if let Some(error) = input.cents_error.filter(|e| e.is_finite()) {
            self.errors.push(error);
        }

        let accuracy = match self.errors.median() {
            Some(error) => (-error.abs() / c.pitch_decay_cents).exp(),
            None => 0.0,
        };
        let certainty = unit_gate(input.confidence, c.confidence_midpoint, c.confidence_steepness);
        let voicing = soft_onset(input.measured_hz, c.voicing_midpoint_hz, c.voicing_width_hz)
            * soft_onset(input.expected_hz, c.voicing_midpoint_hz, c.voicing_width_hz);

        blend_from_floor(c.floor, accuracy * certainty * voicing)
    }

    pub fn score_energy(&mut self, measured_rms: f32, expected_db: Option<f32>) -> f32 {
        let c = &self.config;
        let db = amplitude_to_db(measured_rms);

        let (low, high) = self
            .level_range
            .unwrap_or((c.min_audible_db, c.min_audible_db + c.min_energy_range_db));
        let level = normalize(db, low, high, c.min_energy_range_db);

        let closeness = match (expected_db, self.reference_range) {
            (Some(expected), Some((ref_low, ref_high))) => {
                let target = normalize(expected, ref_low, ref_high, c.min_energy_range_db);
                1.0 - ((level - target).abs() / c.energy_tolerance).tanh()
            }
            _ => (c.energy_gain * level).tanh(),
        };
        let audible = logistic((db - c.min_audible_db) / c.audible_width_db);
        let score = blend_from_floor(c.floor, closeness * audible);

        // Range updates only affect later frames
        if db >= c.min_audible_db {
            self.level_range = Some(match self.level_range {
                None => (db, db),
                Some((lo, hi)) => (lo.min(db), hi.max(db)),
            });
        }
        score
    }

    /// Weighted blend of whichever scores are present.
    pub fn combine(&self, pitch: Option<f32>, energy: Option<f32>) -> Option<f32> {
        let parts = [
            (pitch, self.config.pitch_weight),
            (energy, self.config.energy_weight),
        ];
        let (sum, weight) = parts
            .iter()
            .filter_map(|(score, w)| score.map(|s| (s * w, *w)))
            .filter(|(_, w)| *w > 0.0)
            .fold((0.0, 0.0), |(s, w), (ps, pw)| (s + ps, w + pw));
        (weight > 0.0).then(|| (sum / weight).clamp(0.0, 1.0))
    }

    pub fn reset(&mut self) {
        self.errors.clear();
        self.level_range = None;
    }
}

fn blend_from_floor(floor: f32, quality: f32) -> f32 {
    (floor + (1.0 - floor) * quality.clamp(0.0, 1.0)).clamp(floor, 1.0)
}

/// Position of `value` in `[low, high]`; the range reaches at least `min_span` below `high`.
fn normalize(value: f32, low: f32, high: f32, min_span: f32) -> f32 {
    let low = low.min(high - min_span);
    ((value - low) / (high - low)).clamp(0.0, 1.0)
}
