use std::sync::Arc;

use super::track::ReferenceTrack;

/// What the reference expects at one playback instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReferenceFrame {
    pub expected_frequency_hz: f32,
    pub expected_confidence: f32,
    /// `None` when the track carries no loudness profile
    pub expected_loudness_db: Option<f32>,
    /// `None` when the track has no beats
    pub nearest_beat: Option<f64>,
    /// `None` when the track has no downbeats
    pub nearest_downbeat: Option<f64>,
}

/// Read-only lookups into a shared reference track.
#[derive(Clone, Debug)]
pub struct ReferenceResolver {
    track: Arc<ReferenceTrack>,
}

impl ReferenceResolver {
    pub fn new(track: Arc<ReferenceTrack>) -> Self {
        Self { track }
    }

    pub fn track(&self) -> &ReferenceTrack {
        &self.track
    }

    /// Nearest reference frame at `time`, or `None` when the track does not cover it.
    pub fn resolve(&self, time: f64) -> Option<ReferenceFrame> {
        let idx = self.track.frame_index(time)?;
        let pitch = self.track.pitch_at(idx)?;
        Some(ReferenceFrame {
            expected_frequency_hz: pitch.frequency_hz,
            expected_confidence: pitch.confidence,
            expected_loudness_db: self.track.loudness_at(idx),
            nearest_beat: self.nearest_beat(time),
            nearest_downbeat: self.nearest_downbeat(time),
        })
    }

    /// Beat time closest to `time` (sorted search).
    pub fn nearest_beat(&self, time: f64) -> Option<f64> {
        nearest_time(self.track.beats(), time)
    }

    /// Bar start closest to `time`.
    pub fn nearest_downbeat(&self, time: f64) -> Option<f64> {
        nearest_time(self.track.downbeats(), time)
    }

    pub fn loudness_range(&self) -> Option<(f32, f32)> {
        self.track.loudness_range()
    }
}

fn nearest_time(times: &[f64], time: f64) -> Option<f64> {
    if times.is_empty() || !time.is_finite() {
        return None;
    }
    let idx = times.partition_point(|&t| t < time);
    if idx == 0 {
        return Some(times[0]);
    }
    if idx >= times.len() {
        return Some(times[times.len() - 1]);
    }
    let (prev, next) = (times[idx - 1], times[idx]);
    Some(if next - time < time - prev { next } else { prev })
}
