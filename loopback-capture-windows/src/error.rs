use loopback_capture_core::CaptureError;
use thiserror::Error;

/// A failed WASAPI/COM call, tagged with the call that failed.
#[derive(Debug, Error)]
pub enum WasapiError {
    #[error("{call} failed: {source}")]
    Call {
        call: &'static str,
        #[source]
        source: windows::core::Error,
    },

    #[error("unsupported wave format tag {0:#06x}")]
    FormatTag(u16),

    #[error("stream used before initialize")]
    NotInitialized,
}

impl From<WasapiError> for CaptureError {
    fn from(e: WasapiError) -> Self {
        CaptureError::InitError(e.to_string())
    }
}

/// Attach the failing call's name to a `windows` result.
pub(crate) trait CallContext<T> {
    fn call(self, call: &'static str) -> Result<T, WasapiError>;
}

impl<T> CallContext<T> for windows::core::Result<T> {
    fn call(self, call: &'static str) -> Result<T, WasapiError> {
        self.map_err(|source| WasapiError::Call { call, source })
    }
}

/// Map a failure inside a poll iteration; these never end the loop.
pub(crate) fn transient(e: WasapiError) -> CaptureError {
    CaptureError::TransientPoll(e.to_string())
}
