use thiserror::Error;

/// Errors that can occur during capture, recording, and device switching.
///
/// Errors from the real-time poll loop never cross the thread boundary as
/// values; they are counted and logged there. Everything else is returned
/// synchronously to the caller of the controller operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The endpoint/driver layer is unavailable. Fatal to the session.
    #[error("audio endpoint unavailable: {0}")]
    InitError(String),

    /// Format negotiation exhausted its fallback for this endpoint.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Recording file create/write failure. Capture is unaffected.
    #[error("i/o error: {0}")]
    IoError(String),

    /// The controller could not switch to the requested endpoint and now
    /// has no active endpoint.
    #[error("device switch failed: {0}")]
    DeviceSwitchFailed(String),

    /// A single poll iteration failed; the capture loop keeps running.
    #[error("transient poll failure: {0}")]
    TransientPoll(String),

    /// The requested transition is not allowed from the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}
