use thiserror::Error;

/// Why a capture device could not be opened or stopped delivering audio.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("no microphone available")]
    NoDevice,
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("unsupported capture format: {0}")]
    Unsupported(String),
    #[error("capture stream failed: {0}")]
    Stream(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("capture unavailable: {0}")]
    Capture(#[from] CaptureError),
    #[error("invalid reference track: {0}")]
    Reference(String),
    #[error("failed to decode audio: {0}")]
    Decode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
