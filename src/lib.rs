//! Real-time karaoke analysis and scoring.
//!
//! Microphone blocks flow through echo cancellation and pitch/energy
//! extraction ([`audio`]), are matched against a preprocessed reference
//! ([`reference`]) and turned into smooth scores, combos and a final report
//! ([`scoring`], [`engine`]). [`session`] wires the two halves together
//! across a real-time thread.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod reference;
pub mod scoring;
pub mod session;

pub use config::EngineConfig;
pub use engine::{LiveScore, ScoringEngine};
pub use error::{CaptureError, EngineError, Result};
pub use reference::ReferenceTrack;
pub use scoring::SessionReport;
pub use session::{run_to_end, LiveSession};
