use serde::Serialize;

use crate::config::ComboConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComboPhase {
    Idle,
    Active,
    /// Just broken; a new streak cannot start until the timer runs out
    Cooldown,
}

/// Snapshot handed to the display after every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ComboState {
    pub current_streak: u32,
    pub max_streak: u32,
    pub cooldown_active: bool,
    /// What the display shows: the broken streak lingers through the cooldown
    pub display_streak: u32,
}

/// Streak counter with a grace band between the break and maintain thresholds.
#[derive(Debug, Clone)]
pub struct ComboTracker {
    maintain_threshold: f32,
    break_threshold: f32,
    cooldown_seconds: f64,
    phase: ComboPhase,
    streak: u32,
    max_streak: u32,
    display_streak: u32,
    cooldown_until: f64,
}

impl ComboTracker {
    pub fn new(config: &ComboConfig) -> Self {
        Self {
            maintain_threshold: config.maintain_threshold,
            break_threshold: config.break_threshold,
            cooldown_seconds: config.cooldown_seconds,
            phase: ComboPhase::Idle,
            streak: 0,
            max_streak: 0,
            display_streak: 0,
            cooldown_until: 0.0,
        }
    }

    /// Advance with one frame's combined score. Unscored frames neither extend nor break.
    pub fn update(&mut self, timestamp: f64, combined: Option<f32>) -> ComboState {
        if self.phase == ComboPhase::Cooldown && timestamp >= self.cooldown_until {
            self.phase = ComboPhase::Idle;
            self.display_streak = 0;
        }

        let Some(score) = combined else {
            return self.state();
        };

        match self.phase {
            ComboPhase::Cooldown => {}
            ComboPhase::Idle | ComboPhase::Active => {
                if score >= self.maintain_threshold {
                    self.streak += 1;
                    self.display_streak = self.streak;
                    self.max_streak = self.max_streak.max(self.streak);
                    self.phase = ComboPhase::Active;
                } else if score < self.break_threshold && self.streak > 0 {
                    log::debug!("Combo of {} broken at {:.2}s", self.streak, timestamp);
                    self.streak = 0;
                    self.phase = ComboPhase::Cooldown;
                    self.cooldown_until = timestamp + self.cooldown_seconds;
                }
            }
        }
        self.state()
    }

    pub fn phase(&self) -> ComboPhase {
        self.phase
    }

    pub fn state(&self) -> ComboState {
        ComboState {
            current_streak: self.streak,
            max_streak: self.max_streak,
            cooldown_active: self.phase == ComboPhase::Cooldown,
            display_streak: self.display_streak,
        }
    }

    pub fn reset(&mut self) {
        self.phase = ComboPhase::Idle;
        self.streak = 0;
        self.max_streak = 0;
        self.display_streak = 0;
        self.cooldown_until = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.02;

    fn tracker() -> ComboTracker {
        ComboTracker::new(&ComboConfig::default())
    }

    #[test]
    fn streak_counts_consecutive_good_frames() {
        let mut combo = tracker();
        for i in 1..=5 {
            let state = combo.update(i as f64 * DT, Some(0.9));
            assert_eq!(state.current_streak, i);
            assert_eq!(state.max_streak, i);
        }
        assert_eq!(combo.phase(), ComboPhase::Active);
    }

    #[test]
    fn grace_band_and_unscored_frames_hold_the_streak() {
        let mut combo = tracker();
        combo.update(0.0, Some(0.9));
        combo.update(DT, Some(0.9));
        assert_eq!(combo.update(2.0 * DT, Some(0.55)).current_streak, 2);
        assert_eq!(combo.update(3.0 * DT, None).current_streak, 2);
        assert_eq!(combo.update(4.0 * DT, Some(0.9)).current_streak, 3);
    }

    #[test]
    fn break_resets_and_enters_cooldown() {
        let mut combo = tracker();
        for i in 0..10 {
            combo.update(i as f64 * DT, Some(0.95));
        }
        let broken = combo.update(0.2, Some(0.1));
        assert_eq!(broken.current_streak, 0);
        assert_eq!(broken.max_streak, 10);
        assert!(broken.cooldown_active);
        assert_eq!(broken.display_streak, 10);

        // Good frames during cooldown cannot start a new streak
        let during = combo.update(1.0, Some(0.99));
        assert_eq!(during.current_streak, 0);
        assert_eq!(during.display_streak, 10);

        // Cooldown expires at 0.2 + 1.5
        let after = combo.update(1.71, Some(0.99));
        assert!(!after.cooldown_active);
        assert_eq!(after.current_streak, 1);
        assert_eq!(after.display_streak, 1);
        assert_eq!(after.max_streak, 10);
    }

    #[test]
    fn cooldown_expiry_zeroes_display_without_a_score() {
        let mut combo = tracker();
        combo.update(0.0, Some(0.9));
        combo.update(0.1, Some(0.0));
        let state = combo.update(2.0, None);
        assert_eq!(combo.phase(), ComboPhase::Idle);
        assert_eq!(state.display_streak, 0);
    }

    #[test]
    fn low_score_while_idle_does_not_start_cooldown() {
        let mut combo = tracker();
        let state = combo.update(0.0, Some(0.0));
        assert!(!state.cooldown_active);
        assert_eq!(combo.update(DT, Some(0.8)).current_streak, 1);
    }

    #[test]
    fn max_streak_never_decreases() {
        let mut combo = tracker();
        let scores = [0.9, 0.9, 0.9, 0.1, 0.9, 0.9, 0.3, 0.9, 0.9, 0.9, 0.9, 0.9];
        let mut prev_max = 0;
        for (i, s) in scores.iter().enumerate() {
            let state = combo.update(i as f64, Some(*s));
            assert!(state.max_streak >= prev_max);
            prev_max = state.max_streak;
        }
        // 3, then cooldowns swallow one frame each, then 1 and 4
        assert_eq!(prev_max, 4);
    }
}
