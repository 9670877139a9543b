use serde::Serialize;
use std::collections::VecDeque;

use super::combo::ComboState;
use super::scorer::ScoreSample;
use super::smooth::median_of_sorted;
use crate::config::{BadgeConfig, EngineConfig, ScoringConfig, SessionConfig};
use crate::reference::Phrase;

/// Sum/count pair; `None` entries never reach it.
#[derive(Debug, Clone, Copy, Default)]
struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    fn push(&mut self, value: Option<f32>) {
        if let Some(v) = value {
            self.sum += v as f64;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f32> {
        (self.count > 0).then(|| (self.sum / self.count as f64) as f32)
    }
}

/// Welford mean/variance for the consistency badge.
#[derive(Debug, Clone, Copy, Default)]
struct RunningSpread {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningSpread {
    fn push(&mut self, value: Option<f32>) {
        let Some(v) = value else { return };
        let v = v as f64;
        self.count += 1;
        let delta = v - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (v - self.mean);
    }

    /// `1 - stddev / mean`, floored at zero.
    fn consistency(&self) -> Option<f32> {
        if self.count < 2 || self.mean <= 0.0 {
            return None;
        }
        let stddev = (self.m2 / self.count as f64).sqrt();
        Some((1.0 - stddev / self.mean).max(0.0) as f32)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhraseReport {
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub pitch_score: Option<f32>,
    pub energy_score: Option<f32>,
    pub total_score: Option<f32>,
    pub median_cents_error: Option<f32>,
    /// Fraction of voiced frames within the in-tune tolerance
    pub in_tune_ratio: Option<f32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub id: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FrameCounts {
    pub scored: u64,
    /// No reference coverage, or an unvoiced reference frame
    pub unscored: u64,
    /// Arrived out of timestamp order
    pub rejected: u64,
    /// Lost between the real-time thread and the scorer
    pub dropped: u64,
}

/// Final, immutable result of one session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionReport {
    pub pitch_score: Option<f32>,
    pub energy_score: Option<f32>,
    pub total_score: Option<f32>,
    pub max_streak: u32,
    pub consistency: Option<f32>,
    pub median_cents_error: Option<f32>,
    pub key_shift_cents: f32,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub phrases: Vec<PhraseReport>,
    pub badges: Vec<Badge>,
    pub frames: FrameCounts,
}

/// Per-session score collector. Whole-session means run over every sample
/// ever pushed; phrase breakdowns use the retained ring.
#[derive(Debug, Clone)]
pub struct SessionAccumulator {
    samples: VecDeque<ScoreSample>,
    session: SessionConfig,
    scoring: ScoringConfig,
    badges: BadgeConfig,
    phrases: Vec<Phrase>,
    pitch: RunningMean,
    energy: RunningMean,
    spread: RunningSpread,
    max_streak: u32,
    counts: FrameCounts,
    start: Option<f64>,
    end: Option<f64>,
}

impl SessionAccumulator {
    /// `phrases` may be empty, in which case fixed-length phrases are used.
    pub fn new(config: &EngineConfig, phrases: Vec<Phrase>) -> Self {
        Self {
            samples: VecDeque::with_capacity(config.session.max_samples.min(4096)),
            session: config.session.clone(),
            scoring: config.scoring.clone(),
            badges: config.badges.clone(),
            phrases,
            pitch: RunningMean::default(),
            energy: RunningMean::default(),
            spread: RunningSpread::default(),
            max_streak: 0,
            counts: FrameCounts::default(),
            start: None,
            end: None,
        }
    }

    pub fn push(&mut self, sample: ScoreSample, combo: &ComboState) {
        if self.samples.len() == self.session.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        self.pitch.push(sample.pitch);
        self.energy.push(sample.energy);
        self.spread.push(sample.combined);
        self.max_streak = self.max_streak.max(combo.max_streak);
        if sample.combined.is_some() {
            self.counts.scored += 1;
        } else {
            self.counts.unscored += 1;
        }
        self.start.get_or_insert(sample.timestamp);
        self.end = Some(sample.timestamp);
    }

    pub fn retained(&self) -> usize {
        self.samples.len()
    }

    pub fn finalize(self, rejected: u64, dropped: u64, key_shift_cents: f32) -> SessionReport {
        let pitch_score = self.pitch.mean();
        let energy_score = self.energy.mean();
        let total_score = self.weighted_total(pitch_score, energy_score);
        let consistency = self.spread.consistency();

        let mut cents: Vec<f32> = self.samples.iter().filter_map(|s| s.cents_error).collect();
        cents.sort_by(f32::total_cmp);
        let median_cents_error = (!cents.is_empty()).then(|| median_of_sorted(&cents));

        let phrases = self.phrase_reports();
        let badges = self.badges_for(pitch_score, energy_score, consistency);

        log::info!(
            "Session finished: total={} pitch={} energy={} max_streak={} phrases={} badges={}",
            fmt_score(total_score),
            fmt_score(pitch_score),
            fmt_score(energy_score),
            self.max_streak,
            phrases.len(),
            badges.len()
        );

        SessionReport {
            pitch_score,
            energy_score,
            total_score,
            max_streak: self.max_streak,
            consistency,
            median_cents_error,
            key_shift_cents,
            start: self.start,
            end: self.end,
            phrases,
            badges,
            frames: FrameCounts {
                rejected,
                dropped,
                ..self.counts
            },
        }
    }

    fn weighted_total(&self, pitch: Option<f32>, energy: Option<f32>) -> Option<f32> {
        let parts = [
            (pitch, self.scoring.pitch_weight),
            (energy, self.scoring.energy_weight),
        ];
        let (sum, weight) = parts
            .iter()
            .filter_map(|(score, w)| score.map(|s| (s * w, *w)))
            .fold((0.0f32, 0.0f32), |(s, w), (ps, pw)| (s + ps, w + pw));
        (weight > 0.0).then(|| sum / weight)
    }

    fn phrase_bounds(&self) -> Vec<Phrase> {
        if !self.phrases.is_empty() {
            return self.phrases.clone();
        }
        let (Some(start), Some(end)) = (self.samples.front(), self.samples.back()) else {
            return Vec::new();
        };
        let len = self.session.phrase_seconds;
        let first = (start.timestamp / len).floor() as i64;
        let last = (end.timestamp / len).floor() as i64;
        (first..=last)
            .enumerate()
            .map(|(i, k)| Phrase {
                id: i as u32 + 1,
                start: k as f64 * len,
                end: (k + 1) as f64 * len,
            })
            .collect()
    }

    fn phrase_reports(&self) -> Vec<PhraseReport> {
        let tolerance = self.session.in_tune_cents;
        self.phrase_bounds()
            .into_iter()
            .filter_map(|phrase| {
                let inside: Vec<&ScoreSample> = self
                    .samples
                    .iter()
                    .filter(|s| s.timestamp >= phrase.start && s.timestamp < phrase.end)
                    .collect();
                if inside.is_empty() {
                    return None;
                }

                let mut pitch = RunningMean::default();
                let mut energy = RunningMean::default();
                for s in &inside {
                    pitch.push(s.pitch);
                    energy.push(s.energy);
                }
                let mut cents: Vec<f32> = inside.iter().filter_map(|s| s.cents_error).collect();
                cents.sort_by(f32::total_cmp);
                let in_tune = cents.iter().filter(|c| c.abs() <= tolerance).count();

                Some(PhraseReport {
                    id: phrase.id,
                    start: phrase.start,
                    end: phrase.end,
                    pitch_score: pitch.mean(),
                    energy_score: energy.mean(),
                    total_score: self.weighted_total(pitch.mean(), energy.mean()),
                    median_cents_error: (!cents.is_empty()).then(|| median_of_sorted(&cents)),
                    in_tune_ratio: (!cents.is_empty()).then(|| in_tune as f32 / cents.len() as f32),
                })
            })
            .collect()
    }

    fn badges_for(&self, pitch: Option<f32>, energy: Option<f32>, consistency: Option<f32>) -> Vec<Badge> {
        let b = &self.badges;
        let mut earned = Vec::new();
        if self.max_streak >= b.combo_streak {
            earned.push(Badge {
                id: "combo_master".into(),
                description: format!("Held a combo of {} frames", self.max_streak),
            });
        }
        if let Some(c) = consistency.filter(|c| *c >= b.consistency) {
            earned.push(Badge {
                id: "steady_voice".into(),
                description: format!("Kept a steady performance ({:.0}% consistency)", c * 100.0),
            });
        }
        if let Some(p) = pitch.filter(|p| *p >= b.pitch_perfect) {
            earned.push(Badge {
                id: "pitch_perfect".into(),
                description: format!("Sang in tune ({:.0}% pitch score)", p * 100.0),
            });
        }
        if let Some(e) = energy.filter(|e| *e >= b.powerhouse) {
            earned.push(Badge {
                id: "powerhouse".into(),
                description: format!("Matched the song's dynamics ({:.0}% energy score)", e * 100.0),
            });
        }
        earned
    }
}

fn fmt_score(score: Option<f32>) -> String {
    score.map_or_else(|| "n/a".to_string(), |s| format!("{:.3}", s))
}
