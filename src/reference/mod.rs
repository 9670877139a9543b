pub mod resolver;
pub mod track;

pub use resolver::{ReferenceFrame, ReferenceResolver};
pub use track::{ExpectedPitch, Phrase, ReferenceTrack};
