use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, Result};

/// Expected pitch on one reference frame. 0 Hz means the reference is unvoiced there.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct ExpectedPitch {
    pub frequency_hz: f32,
    pub confidence: f32,
}

/// A phrase boundary supplied by preprocessing, on the playback timeline.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Phrase {
    #[serde(default)]
    pub id: u32,
    pub start: f64,
    pub end: f64,
}

/// Time-aligned reference data on a fixed frame grid. Read-only once built.
#[derive(Clone, Debug)]
pub struct ReferenceTrack {
    fps: f64,
    pitch: Vec<ExpectedPitch>,
    /// Empty, or one value per pitch frame
    loudness_db: Vec<f32>,
    loudness_range: Option<(f32, f32)>,
    beats: Vec<f64>,
    downbeats: Vec<f64>,
    phrases: Vec<Phrase>,
    key: Option<String>,
    song_id: Option<String>,
}

// Shape of reference.json as written by the preprocessing pipeline.
#[derive(Deserialize)]
struct ReferenceDocument {
    fps: f64,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    song_id: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default, rename = "beats_k")]
    beats: Vec<f64>,
    #[serde(default, rename = "downbeats_k")]
    downbeats: Vec<f64>,
    #[serde(default, rename = "phrases_k")]
    phrases: Vec<Phrase>,
    #[serde(default, rename = "f0_ref_on_k")]
    pitch: Vec<PitchPoint>,
    #[serde(default, rename = "loudness_ref")]
    loudness: Vec<LoudnessPoint>,
}

#[derive(Deserialize)]
struct PitchPoint {
    t: f64,
    f0: f32,
    #[serde(default = "default_conf")]
    conf: f32,
}

#[derive(Deserialize)]
struct LoudnessPoint {
    t: f64,
    #[serde(rename = "LUFS")]
    lufs: f32,
}

fn default_conf() -> f32 { 1.0 }

impl ReferenceTrack {
    /// Build a track from dense per-frame arrays.
    pub fn new(fps: f64, pitch: Vec<ExpectedPitch>, loudness_db: Vec<f32>, beats: Vec<f64>) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(EngineError::Reference(format!("frame rate must be > 0, got {}", fps)));
        }
        if !loudness_db.is_empty() && loudness_db.len() != pitch.len() {
            return Err(EngineError::Reference(format!(
                "loudness has {} frames but pitch has {}",
                loudness_db.len(),
                pitch.len()
            )));
        }
        let loudness_range = loudness_db
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<(f32, f32)>, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            });

        Ok(Self {
            fps,
            pitch,
            loudness_db,
            loudness_range,
            beats: sorted_times(beats, "beats"),
            downbeats: Vec::new(),
            phrases: Vec::new(),
            key: None,
            song_id: None,
        })
    }

    pub fn with_phrases(mut self, mut phrases: Vec<Phrase>) -> Self {
        phrases.retain(|p| p.end > p.start);
        phrases.sort_by(|a, b| a.start.total_cmp(&b.start));
        self.phrases = phrases;
        self
    }

    pub fn with_downbeats(mut self, downbeats: Vec<f64>) -> Self {
        self.downbeats = sorted_times(downbeats, "downbeats");
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let doc: ReferenceDocument = serde_json::from_str(json)?;
        Self::from_document(doc)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let track = Self::from_json(&content)?;
        log::info!(
            "Loaded reference {}: {} frames @ {} fps, {} beats, {} phrases",
            path.display(),
            track.frame_count(),
            track.fps,
            track.beats.len(),
            track.phrases.len()
        );
        Ok(track)
    }

    fn from_document(doc: ReferenceDocument) -> Result<Self> {
        if !(doc.fps.is_finite() && doc.fps > 0.0) {
            return Err(EngineError::Reference(format!("frame rate must be > 0, got {}", doc.fps)));
        }
        let fps = doc.fps;

        let duration = match doc.duration {
            Some(d) if d < 0.0 || !d.is_finite() => {
                return Err(EngineError::Reference(format!("invalid duration {}", d)));
            }
            Some(d) => d,
            None => doc.pitch.iter().map(|p| p.t).fold(0.0, f64::max) + 1.0 / fps,
        };
        let frames = (duration * fps - 1e-9).ceil().max(0.0) as usize;

        // Only voiced frames are listed; everything else is covered but unvoiced.
        let mut pitch = vec![ExpectedPitch::default(); frames];
        for point in &doc.pitch {
            if point.t < 0.0 || !(point.f0 > 0.0) {
                continue;
            }
            let idx = (point.t * fps).round() as usize;
            if let Some(slot) = pitch.get_mut(idx) {
                *slot = ExpectedPitch {
                    frequency_hz: point.f0,
                    confidence: point.conf.clamp(0.0, 1.0),
                };
            }
        }

        let loudness = align_loudness(doc.loudness, fps, frames);

        let mut track = Self::new(fps, pitch, loudness, doc.beats)?
            .with_phrases(doc.phrases)
            .with_downbeats(doc.downbeats);
        track.key = doc.key;
        track.song_id = doc.song_id;
        Ok(track)
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn frame_count(&self) -> usize {
        self.pitch.len()
    }

    pub fn duration(&self) -> f64 {
        self.pitch.len() as f64 / self.fps
    }

    /// Nearest frame index, or `None` outside the covered range.
    pub fn frame_index(&self, time: f64) -> Option<usize> {
        if !time.is_finite() || time < 0.0 {
            return None;
        }
        let idx = (time * self.fps).round() as usize;
        (idx < self.pitch.len()).then_some(idx)
    }

    pub fn pitch_at(&self, index: usize) -> Option<ExpectedPitch> {
        self.pitch.get(index).copied()
    }

    pub fn loudness_at(&self, index: usize) -> Option<f32> {
        self.loudness_db.get(index).copied().filter(|v| v.is_finite())
    }

    /// Quietest and loudest reference frame, in dB.
    pub fn loudness_range(&self) -> Option<(f32, f32)> {
        self.loudness_range
    }

    pub fn beats(&self) -> &[f64] {
        &self.beats
    }

    pub fn downbeats(&self) -> &[f64] {
        &self.downbeats
    }

    pub fn phrases(&self) -> &[Phrase] {
        &self.phrases
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn song_id(&self) -> Option<&str> {
        self.song_id.as_deref()
    }
}

fn sorted_times(mut times: Vec<f64>, what: &str) -> Vec<f64> {
    times.retain(|t| t.is_finite());
    if times.windows(2).any(|w| w[1] < w[0]) {
        log::warn!("Reference {} were not sorted; sorting", what);
        times.sort_by(f64::total_cmp);
    }
    times
}

/// Resample a loudness profile onto the frame grid by nearest timestamp.
fn align_loudness(mut points: Vec<LoudnessPoint>, fps: f64, frames: usize) -> Vec<f32> {
    points.retain(|p| p.t.is_finite());
    if points.is_empty() {
        return Vec::new();
    }
    points.sort_by(|a, b| a.t.total_cmp(&b.t));

    (0..frames)
        .map(|i| {
            let t = i as f64 / fps;
            let idx = points.partition_point(|p| p.t < t);
            let candidate = match idx {
                0 => &points[0],
                i if i >= points.len() => &points[points.len() - 1],
                i => {
                    if (points[i].t - t) < (t - points[i - 1].t) {
                        &points[i]
                    } else {
                        &points[i - 1]
                    }
                }
            };
            candidate.lufs
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "version": "2.0",
        "song_id": "demo_ballad",
        "fps": 50,
        "duration": 1.0,
        "beats_k": [0.5, 0.0],
        "downbeats_k": [0.0],
        "tempo": 120.0,
        "phrases_k": [{"id": 1, "start": 0.0, "end": 0.8}],
        "key": "C major",
        "f0_ref_on_k": [
            {"t": 0.1, "f0": 440.0, "conf": 0.9},
            {"t": 0.12, "f0": 441.0, "conf": 0.8}
        ],
        "loudness_ref": [{"t": 0.0, "LUFS": -30.0}, {"t": 0.5, "LUFS": -10.0}],
        "note_bins": []
    }"#;

    #[test]
    fn parses_preprocessing_output() {
        let track = ReferenceTrack::from_json(DOC).unwrap();
        assert_eq!(track.frame_count(), 50);
        assert_eq!(track.song_id(), Some("demo_ballad"));
        assert_eq!(track.key(), Some("C major"));
        assert_eq!(track.beats(), &[0.0, 0.5]);
        assert_eq!(track.downbeats(), &[0.0]);
        assert_eq!(track.phrases().len(), 1);

        let voiced = track.pitch_at(5).unwrap();
        assert_eq!(voiced.frequency_hz, 440.0);
        assert_eq!(voiced.confidence, 0.9);
        assert_eq!(track.pitch_at(6).unwrap().frequency_hz, 441.0);
        // Listed only voiced frames; the rest is covered-but-unvoiced
        assert_eq!(track.pitch_at(20).unwrap(), ExpectedPitch::default());

        assert_eq!(track.loudness_at(0), Some(-30.0));
        assert_eq!(track.loudness_at(40), Some(-10.0));
        assert_eq!(track.loudness_range(), Some((-30.0, -10.0)));
    }

    #[test]
    fn frame_index_never_clamps() {
        let track = ReferenceTrack::from_json(DOC).unwrap();
        assert_eq!(track.frame_index(-0.001), None);
        assert_eq!(track.frame_index(0.0), Some(0));
        assert_eq!(track.frame_index(0.5), Some(25));
        assert_eq!(track.frame_index(0.98), Some(49));
        assert_eq!(track.frame_index(1.0), None);
        assert_eq!(track.frame_index(f64::NAN), None);
    }

    #[test]
    fn rejects_bad_frame_rate_and_mismatched_loudness() {
        assert!(ReferenceTrack::new(0.0, vec![], vec![], vec![]).is_err());
        let pitch = vec![ExpectedPitch::default(); 3];
        assert!(matches!(
            ReferenceTrack::new(50.0, pitch, vec![-20.0; 2], vec![]),
            Err(EngineError::Reference(_))
        ));
        assert!(ReferenceTrack::from_json(r#"{"fps": -1}"#).is_err());
    }

    #[test]
    fn duration_inferred_from_pitch_when_missing() {
        let track = ReferenceTrack::from_json(r#"{"fps": 10, "f0_ref_on_k": [{"t": 0.5, "f0": 200.0}]}"#).unwrap();
        assert_eq!(track.frame_count(), 6);
        assert_eq!(track.pitch_at(5).unwrap().confidence, 1.0);
        assert!(track.loudness_range().is_none());
    }
}
