use serde::Deserialize;
use std::path::Path;

use crate::error::{EngineError, Result};

/// Immutable engine configuration, handed to every component at construction.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub echo: EchoConfig,
    #[serde(default)]
    pub pitch: PitchConfig,
    #[serde(default)]
    pub key_shift: KeyShiftConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub combo: ComboConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub badges: BadgeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Samples per capture block
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Samples fed to the pitch extractor
    #[serde(default = "default_analysis_window")]
    pub analysis_window: usize,
    /// Extract one frame every N blocks
    #[serde(default = "default_analysis_interval_blocks")]
    pub analysis_interval_blocks: usize,
    /// Frames buffered between the real-time thread and the scorer before dropping
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Subtracted from every frame timestamp (capture path latency)
    #[serde(default)]
    pub latency_compensation_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EchoConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_taps")]
    pub taps: usize,
    #[serde(default = "default_step_size")]
    pub step_size: f32,
    #[serde(default = "default_regularization")]
    pub regularization: f32,
    /// Weights are clamped to [-limit, limit]
    #[serde(default = "default_weight_limit")]
    pub weight_limit: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrightnessMode {
    /// Zero-crossing rate scaled to Hz
    ZeroCrossing,
    /// FFT spectral centroid
    Spectral,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PitchConfig {
    #[serde(default = "default_min_frequency")]
    pub min_frequency_hz: f32,
    #[serde(default = "default_max_frequency")]
    pub max_frequency_hz: f32,
    /// Normalized difference a lag must fall below to count as voiced
    #[serde(default = "default_pitch_threshold")]
    pub threshold: f32,
    #[serde(default = "default_brightness")]
    pub brightness: BrightnessMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyShiftConfig {
    #[serde(default = "default_key_shift_window")]
    pub window: usize,
    #[serde(default = "default_key_shift_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_tolerance_cents")]
    pub tolerance_cents: f32,
    #[serde(default = "default_max_offset_cents")]
    pub max_offset_cents: f32,
    /// Scale of the tanh ramp past the tolerance
    #[serde(default = "default_softness_cents")]
    pub softness_cents: f32,
    /// Frames below this detection confidence do not feed the estimator
    #[serde(default = "default_key_shift_min_confidence")]
    pub min_confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Lowest score any frame can receive
    #[serde(default = "default_floor")]
    pub floor: f32,
    /// Cents error at which pitch accuracy has decayed to 1/e
    #[serde(default = "default_pitch_decay_cents")]
    pub pitch_decay_cents: f32,
    /// Median window over recent cents errors
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
    #[serde(default = "default_confidence_midpoint")]
    pub confidence_midpoint: f32,
    #[serde(default = "default_confidence_steepness")]
    pub confidence_steepness: f32,
    /// Frequency around which a pitch is considered voiced
    #[serde(default = "default_voicing_midpoint")]
    pub voicing_midpoint_hz: f32,
    #[serde(default = "default_voicing_width")]
    pub voicing_width_hz: f32,
    /// Normalized loudness difference at which energy closeness saturates
    #[serde(default = "default_energy_tolerance")]
    pub energy_tolerance: f32,
    /// Gain applied to the normalized level when the reference has no loudness
    #[serde(default = "default_energy_gain")]
    pub energy_gain: f32,
    #[serde(default = "default_min_audible_db")]
    pub min_audible_db: f32,
    #[serde(default = "default_audible_width_db")]
    pub audible_width_db: f32,
    /// Smallest span used when normalizing against the running min/max
    #[serde(default = "default_min_energy_range_db")]
    pub min_energy_range_db: f32,
    #[serde(default = "default_weight")]
    pub pitch_weight: f32,
    #[serde(default = "default_weight")]
    pub energy_weight: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComboConfig {
    #[serde(default = "default_maintain_threshold")]
    pub maintain_threshold: f32,
    #[serde(default = "default_break_threshold")]
    pub break_threshold: f32,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    #[serde(default = "default_phrase_seconds")]
    pub phrase_seconds: f64,
    #[serde(default = "default_in_tune_cents")]
    pub in_tune_cents: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BadgeConfig {
    #[serde(default = "default_combo_streak")]
    pub combo_streak: u32,
    #[serde(default = "default_consistency")]
    pub consistency: f32,
    #[serde(default = "default_pitch_perfect")]
    pub pitch_perfect: f32,
    #[serde(default = "default_powerhouse")]
    pub powerhouse: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            block_size: default_block_size(),
            analysis_window: default_analysis_window(),
            analysis_interval_blocks: default_analysis_interval_blocks(),
            channel_capacity: default_channel_capacity(),
            latency_compensation_seconds: 0.0,
        }
    }
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            taps: default_taps(),
            step_size: default_step_size(),
            regularization: default_regularization(),
            weight_limit: default_weight_limit(),
        }
    }
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            min_frequency_hz: default_min_frequency(),
            max_frequency_hz: default_max_frequency(),
            threshold: default_pitch_threshold(),
            brightness: default_brightness(),
        }
    }
}

impl Default for KeyShiftConfig {
    fn default() -> Self {
        Self {
            window: default_key_shift_window(),
            min_samples: default_key_shift_min_samples(),
            tolerance_cents: default_tolerance_cents(),
            max_offset_cents: default_max_offset_cents(),
            softness_cents: default_softness_cents(),
            min_confidence: default_key_shift_min_confidence(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            floor: default_floor(),
            pitch_decay_cents: default_pitch_decay_cents(),
            smoothing_window: default_smoothing_window(),
            confidence_midpoint: default_confidence_midpoint(),
            confidence_steepness: default_confidence_steepness(),
            voicing_midpoint_hz: default_voicing_midpoint(),
            voicing_width_hz: default_voicing_width(),
            energy_tolerance: default_energy_tolerance(),
            energy_gain: default_energy_gain(),
            min_audible_db: default_min_audible_db(),
            audible_width_db: default_audible_width_db(),
            min_energy_range_db: default_min_energy_range_db(),
            pitch_weight: default_weight(),
            energy_weight: default_weight(),
        }
    }
}

impl Default for ComboConfig {
    fn default() -> Self {
        Self {
            maintain_threshold: default_maintain_threshold(),
            break_threshold: default_break_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_samples: default_max_samples(),
            phrase_seconds: default_phrase_seconds(),
            in_tune_cents: default_in_tune_cents(),
        }
    }
}

impl Default for BadgeConfig {
    fn default() -> Self {
        Self {
            combo_streak: default_combo_streak(),
            consistency: default_consistency(),
            pitch_perfect: default_pitch_perfect(),
            powerhouse: default_powerhouse(),
        }
    }
}

fn default_true() -> bool { true }
fn default_sample_rate() -> u32 { 48_000 }
fn default_block_size() -> usize { 256 }
fn default_analysis_window() -> usize { 2048 }
fn default_analysis_interval_blocks() -> usize { 4 }
fn default_channel_capacity() -> usize { 64 }
fn default_taps() -> usize { 512 }
fn default_step_size() -> f32 { 0.01 }
fn default_regularization() -> f32 { 1e-6 }
fn default_weight_limit() -> f32 { 1.0 }
fn default_min_frequency() -> f32 { 80.0 }
fn default_max_frequency() -> f32 { 1000.0 }
fn default_pitch_threshold() -> f32 { 0.15 }
fn default_brightness() -> BrightnessMode { BrightnessMode::ZeroCrossing }
fn default_key_shift_window() -> usize { 20 }
fn default_key_shift_min_samples() -> usize { 10 }
fn default_tolerance_cents() -> f32 { 100.0 }
fn default_max_offset_cents() -> f32 { 200.0 }
fn default_softness_cents() -> f32 { 100.0 }
fn default_key_shift_min_confidence() -> f32 { 0.5 }
fn default_floor() -> f32 { 0.1 }
fn default_pitch_decay_cents() -> f32 { 100.0 }
fn default_smoothing_window() -> usize { 10 }
fn default_confidence_midpoint() -> f32 { 0.5 }
fn default_confidence_steepness() -> f32 { 10.0 }
fn default_voicing_midpoint() -> f32 { 50.0 }
fn default_voicing_width() -> f32 { 10.0 }
fn default_energy_tolerance() -> f32 { 0.35 }
fn default_energy_gain() -> f32 { 2.0 }
fn default_min_audible_db() -> f32 { -60.0 }
fn default_audible_width_db() -> f32 { 3.0 }
fn default_min_energy_range_db() -> f32 { 20.0 }
fn default_weight() -> f32 { 0.5 }
fn default_maintain_threshold() -> f32 { 0.7 }
fn default_break_threshold() -> f32 { 0.4 }
fn default_cooldown_seconds() -> f64 { 1.5 }
fn default_max_samples() -> usize { 10_000 }
fn default_phrase_seconds() -> f64 { 10.0 }
fn default_in_tune_cents() -> f32 { 50.0 }
fn default_combo_streak() -> u32 { 50 }
fn default_consistency() -> f32 { 0.8 }
fn default_pitch_perfect() -> f32 { 0.9 }
fn default_powerhouse() -> f32 { 0.85 }

impl EngineConfig {
    /// Reject settings the engine cannot run with. Called before any audio is processed.
    pub fn validate(&self) -> Result<()> {
        let a = &self.audio;
        if a.sample_rate == 0 {
            return invalid("audio.sample_rate must be > 0");
        }
        if a.block_size == 0 || a.analysis_interval_blocks == 0 || a.channel_capacity == 0 {
            return invalid("audio.block_size, analysis_interval_blocks and channel_capacity must be > 0");
        }
        if self.echo.taps == 0 {
            return invalid("echo.taps must be > 0");
        }
        if !(self.echo.step_size > 0.0) || !(self.echo.regularization > 0.0) || !(self.echo.weight_limit > 0.0) {
            return invalid("echo.step_size, regularization and weight_limit must be > 0");
        }

        let p = &self.pitch;
        if !(p.min_frequency_hz > 0.0) || p.max_frequency_hz <= p.min_frequency_hz {
            return invalid("pitch frequency range must satisfy 0 < min_frequency_hz < max_frequency_hz");
        }
        if p.max_frequency_hz * 2.0 > a.sample_rate as f32 {
            return invalid("pitch.max_frequency_hz must be below the Nyquist frequency");
        }
        let max_lag = (a.sample_rate as f32 / p.min_frequency_hz).ceil() as usize;
        if a.analysis_window < 2 * max_lag + 2 {
            return Err(EngineError::Config(format!(
                "audio.analysis_window ({}) too short for {} Hz; need at least {} samples",
                a.analysis_window,
                p.min_frequency_hz,
                2 * max_lag + 2
            )));
        }
        if !(p.threshold > 0.0 && p.threshold < 1.0) {
            return invalid("pitch.threshold must be in (0, 1)");
        }

        let k = &self.key_shift;
        if k.window == 0 || k.min_samples == 0 || k.min_samples > k.window {
            return invalid("key_shift requires 0 < min_samples <= window");
        }
        if k.tolerance_cents < 0.0 || !(k.softness_cents > 0.0) || k.max_offset_cents < 0.0 {
            return invalid("key_shift tolerance/max offset must be >= 0 and softness > 0");
        }

        let s = &self.scoring;
        if !(0.0..1.0).contains(&s.floor) {
            return invalid("scoring.floor must be in [0, 1)");
        }
        if s.smoothing_window == 0 {
            return invalid("scoring.smoothing_window must be > 0");
        }
        let positive = [
            s.pitch_decay_cents,
            s.confidence_steepness,
            s.voicing_width_hz,
            s.energy_tolerance,
            s.energy_gain,
            s.audible_width_db,
            s.min_energy_range_db,
        ];
        if positive.iter().any(|v| !(*v > 0.0)) {
            return invalid("scoring decay, steepness, width, tolerance and range constants must be > 0");
        }
        if s.pitch_weight < 0.0 || s.energy_weight < 0.0 || s.pitch_weight + s.energy_weight <= 0.0 {
            return invalid("scoring weights must be >= 0 and not both zero");
        }

        let c = &self.combo;
        if c.break_threshold > c.maintain_threshold {
            return invalid("combo.break_threshold must not exceed combo.maintain_threshold");
        }
        if c.cooldown_seconds < 0.0 {
            return invalid("combo.cooldown_seconds must be >= 0");
        }

        if self.session.max_samples == 0 || !(self.session.phrase_seconds > 0.0) {
            return invalid("session.max_samples and session.phrase_seconds must be > 0");
        }
        Ok(())
    }

    /// Seconds between two extracted analysis frames.
    pub fn frame_interval_seconds(&self) -> f64 {
        (self.audio.block_size * self.audio.analysis_interval_blocks) as f64
            / self.audio.sample_rate as f64
    }
}

fn invalid(msg: &str) -> Result<()> {
    Err(EngineError::Config(msg.to_string()))
}

pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.frame_interval_seconds() - 1024.0 / 48_000.0).abs() < 1e-12);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [scoring]
            pitch_weight = 0.7
            energy_weight = 0.3

            [pitch]
            brightness = "spectral"
            "#,
        )
        .unwrap();
        assert_eq!(config.scoring.pitch_weight, 0.7);
        assert_eq!(config.scoring.floor, 0.1);
        assert_eq!(config.pitch.brightness, BrightnessMode::Spectral);
        assert_eq!(config.audio.sample_rate, 48_000);
    }

    #[test]
    fn rejects_zero_sample_rate_and_empty_filter() {
        let mut config = EngineConfig::default();
        config.audio.sample_rate = 0;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));

        let mut config = EngineConfig::default();
        config.echo.taps = 0;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn rejects_window_too_short_for_min_frequency() {
        let mut config = EngineConfig::default();
        config.audio.analysis_window = 512;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_combo_thresholds() {
        let mut config = EngineConfig::default();
        config.combo.break_threshold = 0.9;
        assert!(config.validate().is_err());
    }
}
