pub mod capture;
pub mod decode;
pub mod echo;
pub mod features;
pub mod pitch;
pub mod signal;
