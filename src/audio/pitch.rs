use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::features::{AnalysisFrame, PitchEstimate};
use crate::config::{BrightnessMode, EngineConfig};

const SILENCE_EPSILON: f32 = 1e-12;

/// Pitch, energy and brightness extraction over fixed-size windows.
///
/// All scratch buffers are allocated up front so `analyze` never allocates.
pub struct PitchExtractor {
    sample_rate: u32,
    min_lag: usize,
    max_lag: usize,
    threshold: f32,
    difference: Vec<f32>,
    normalized: Vec<f32>,
    brightness: Brightness,
}

enum Brightness {
    ZeroCrossing,
    Spectral(SpectralCentroid),
}

struct SpectralCentroid {
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl PitchExtractor {
    pub fn new(config: &EngineConfig) -> Self {
        let sr = config.audio.sample_rate as f32;
        let window = config.audio.analysis_window;
        let min_lag = ((sr / config.pitch.max_frequency_hz).floor() as usize).max(2);
        let max_lag = ((sr / config.pitch.min_frequency_hz).ceil() as usize).min(window / 2);

        let brightness = match config.pitch.brightness {
            BrightnessMode::ZeroCrossing => Brightness::ZeroCrossing,
            BrightnessMode::Spectral => Brightness::Spectral(SpectralCentroid::new(window)),
        };

        Self {
            sample_rate: config.audio.sample_rate,
            min_lag,
            max_lag,
            threshold: config.pitch.threshold,
            difference: vec![0.0; max_lag + 1],
            normalized: vec![1.0; max_lag + 1],
            brightness,
        }
    }

    /// Analyze one window of cleaned samples.
    pub fn analyze(&mut self, window: &[f32], timestamp: f64) -> AnalysisFrame {
        let pitch = self.detect_pitch(window);
        let spectral_centroid_hz = match &mut self.brightness {
            Brightness::ZeroCrossing => zero_crossing_brightness(window, self.sample_rate),
            Brightness::Spectral(centroid) => centroid.compute(window, self.sample_rate),
        };

        AnalysisFrame {
            frequency_hz: pitch.frequency_hz,
            confidence: pitch.confidence,
            energy_rms: rms(window),
            spectral_centroid_hz,
            timestamp,
        }
    }

    /// Cumulative-mean-normalized difference pitch detection.
    /// Returns `PitchEstimate::UNVOICED` when no lag falls below the threshold.
    pub fn detect_pitch(&mut self, window: &[f32]) -> PitchEstimate {
        let max_lag = self.max_lag.min(window.len() / 2);
        if max_lag <= self.min_lag + 1 {
            return PitchEstimate::UNVOICED;
        }
        let integration = window.len() - max_lag;

        // Difference function
        self.difference[0] = 0.0;
        for tau in 1..=max_lag {
            let mut sum = 0.0f32;
            for j in 0..integration {
                let delta = window[j] - window[j + tau];
                sum += delta * delta;
            }
            self.difference[tau] = sum;
        }

        // Cumulative mean normalization
        self.normalized[0] = 1.0;
        let mut running = 0.0f32;
        for tau in 1..=max_lag {
            running += self.difference[tau];
            self.normalized[tau] = if running > SILENCE_EPSILON {
                self.difference[tau] * tau as f32 / running
            } else {
                1.0
            };
        }

        // First dip below threshold, then walk down to its local minimum
        let mut chosen = None;
        let mut tau = self.min_lag;
        while tau < max_lag {
            if self.normalized[tau] < self.threshold {
                while tau + 1 < max_lag && self.normalized[tau + 1] < self.normalized[tau] {
                    tau += 1;
                }
                chosen = Some(tau);
                break;
            }
            tau += 1;
        }

        let Some(tau) = chosen else {
            return PitchEstimate::UNVOICED;
        };

        let refined = tau as f32
            + parabolic_offset(
                self.normalized[tau - 1],
                self.normalized[tau],
                self.normalized[tau + 1],
            );
        if refined <= 0.0 {
            return PitchEstimate::UNVOICED;
        }

        PitchEstimate {
            frequency_hz: self.sample_rate as f32 / refined,
            confidence: (1.0 - self.normalized[tau]).clamp(0.0, 1.0),
        }
    }
}

impl SpectralCentroid {
    fn new(size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            fft,
            hann: hann_window(size),
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch,
        }
    }

    fn compute(&mut self, window: &[f32], sample_rate: u32) -> f32 {
        let size = self.buffer.len();
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let s = window.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(s * self.hann[i], 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let half = size / 2;
        let freq_resolution = sample_rate as f32 / size as f32;
        let mut total = 0.0f32;
        let mut weighted = 0.0f32;
        for (i, c) in self.buffer[..half].iter().enumerate() {
            let mag = c.norm();
            total += mag;
            weighted += i as f32 * freq_resolution * mag;
        }
        if total > 1e-10 {
            weighted / total
        } else {
            0.0
        }
    }
}

/// Sub-sample offset of the minimum of a parabola through three points.
fn parabolic_offset(left: f32, centre: f32, right: f32) -> f32 {
    let denom = left - 2.0 * centre + right;
    if denom.abs() < f32::EPSILON {
        return 0.0;
    }
    (0.5 * (left - right) / denom).clamp(-1.0, 1.0)
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Zero-crossing rate scaled to Hz. A pure tone maps to its own frequency.
pub fn zero_crossing_brightness(samples: &[f32], sample_rate: u32) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32 * sample_rate as f32 * 0.5
}

fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}
