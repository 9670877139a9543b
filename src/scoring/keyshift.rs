use super::smooth::RollingWindow;
use crate::config::KeyShiftConfig;

/// Detects a sustained transposition from recent cents errors and supplies a
/// smooth correction for it.
#[derive(Debug, Clone)]
pub struct KeyShiftEstimator {
    errors: RollingWindow,
    min_samples: usize,
    tolerance: f32,
    max_offset: f32,
    softness: f32,
    offset: f32,
}

impl KeyShiftEstimator {
    pub fn new(config: &KeyShiftConfig) -> Self {
        Self {
            errors: RollingWindow::new(config.window),
            min_samples: config.min_samples,
            tolerance: config.tolerance_cents,
            max_offset: config.max_offset_cents,
            softness: config.softness_cents,
            offset: 0.0,
        }
    }

    /// Record one raw cents error and return the updated offset.
    pub fn push(&mut self, cents_error: f32) -> f32 {
        if cents_error.is_finite() {
            self.errors.push(cents_error);
            self.offset = self.estimate();
        }
        self.offset
    }

    fn estimate(&mut self) -> f32 {
        if self.errors.len() < self.min_samples {
            return 0.0;
        }
        let Some(median) = self.errors.median() else {
            return 0.0;
        };
        // tanh ramp from zero at the tolerance, saturating at max_offset
        let excess = (median.abs() - self.tolerance).max(0.0);
        let strength = (excess / self.softness).tanh();
        median.signum() * median.abs().min(self.max_offset) * strength
    }

    /// Current offset estimate, in cents.
    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// Remove the estimated transposition from a raw error.
    pub fn correct(&self, cents_error: f32) -> f32 {
        cents_error - self.offset
    }

    pub fn reset(&mut self) {
        self.errors.clear();
        self.offset = 0.0;
    }
}
