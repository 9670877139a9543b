//! Continuous building blocks for scoring. Nothing here branches on a threshold.

use std::collections::VecDeque;

pub const CENTS_PER_OCTAVE: f32 = 1200.0;

/// Signed interval from `expected` to `measured` in cents; `None` unless both are voiced.
pub fn cents_between(measured_hz: f32, expected_hz: f32) -> Option<f32> {
    if measured_hz > 0.0 && expected_hz > 0.0 {
        Some(CENTS_PER_OCTAVE * (measured_hz / expected_hz).log2())
    } else {
        None
    }
}

pub fn logistic(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Logistic ramp over `x >= 0`, rescaled so it is exactly 0 at `x = 0` and
/// approaches 1 well past `midpoint`.
pub fn soft_onset(x: f32, midpoint: f32, width: f32) -> f32 {
    let base = logistic(-midpoint / width);
    ((logistic((x.max(0.0) - midpoint) / width) - base) / (1.0 - base)).clamp(0.0, 1.0)
}

/// Logistic gate over `[0, 1]`, rescaled so that `gate(0) = 0` and `gate(1) = 1`.
pub fn unit_gate(x: f32, midpoint: f32, steepness: f32) -> f32 {
    let low = logistic(-steepness * midpoint);
    let high = logistic(steepness * (1.0 - midpoint));
    let x = x.clamp(0.0, 1.0);
    ((logistic(steepness * (x - midpoint)) - low) / (high - low)).clamp(0.0, 1.0)
}

/// Bounded window of recent values with an outlier-resistant centre.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<f32>,
    capacity: usize,
    scratch: Vec<f32>,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            scratch: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn median(&mut self) -> Option<f32> {
        if self.values.is_empty() {
            return None;
        }
        self.scratch.clear();
        self.scratch.extend(self.values.iter().copied());
        self.scratch.sort_by(f32::total_cmp);
        Some(median_of_sorted(&self.scratch))
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Median of an already sorted, non-empty slice.
pub fn median_of_sorted(sorted: &[f32]) -> f32 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_of_octave_and_unison() {
        assert!((cents_between(880.0, 440.0).unwrap() - 1200.0).abs() < 1e-3);
        assert_eq!(cents_between(440.0, 440.0), Some(0.0));
        assert_eq!(cents_between(0.0, 440.0), None);
        assert_eq!(cents_between(440.0, 0.0), None);
    }

    #[test]
    fn soft_onset_is_anchored_and_monotonic() {
        assert_eq!(soft_onset(0.0, 50.0, 10.0), 0.0);
        assert!(soft_onset(440.0, 50.0, 10.0) > 0.999);
        let mut prev = 0.0;
        for f in (0..200).map(|i| i as f32) {
            let v = soft_onset(f, 50.0, 10.0);
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn unit_gate_hits_both_ends() {
        assert_eq!(unit_gate(0.0, 0.5, 10.0), 0.0);
        assert!((unit_gate(1.0, 0.5, 10.0) - 1.0).abs() < 1e-6);
        assert!((unit_gate(0.5, 0.5, 10.0) - 0.5).abs() < 1e-3);
        assert_eq!(unit_gate(-3.0, 0.5, 10.0), 0.0);
    }

    #[test]
    fn rolling_median_evicts_oldest() {
        let mut window = RollingWindow::new(3);
        assert_eq!(window.median(), None);
        for v in [100.0, 1.0, 2.0, 3.0] {
            window.push(v);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.median(), Some(2.0));
        window.push(10.0);
        assert_eq!(window.median(), Some(3.0));
        window.clear();
        assert!(window.is_empty());
    }

    #[test]
    fn even_median_averages() {
        assert_eq!(median_of_sorted(&[1.0, 2.0, 4.0, 8.0]), 3.0);
    }
}
