pub mod accumulator;
pub mod combo;
pub mod keyshift;
pub mod scorer;
pub mod smooth;

pub use accumulator::{Badge, FrameCounts, PhraseReport, SessionAccumulator, SessionReport};
pub use combo::{ComboPhase, ComboState, ComboTracker};
pub use keyshift::KeyShiftEstimator;
pub use scorer::{ContinuousScorer, PitchInput, ScoreSample};
