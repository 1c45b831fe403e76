use std::time::Duration;

use crate::models::chunk::Chunk;
use crate::models::endpoint::{DeviceDescriptor, Endpoint, EndpointKind};
use crate::models::error::CaptureError;
use crate::models::format::{CaptureFormat, MixFormat};

/// How an opened endpoint streams audio to the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamMode {
    /// Shared mode, capturing what a render device plays.
    Loopback,
    /// Shared mode, capturing a capture device directly.
    Direct,
}

impl From<EndpointKind> for StreamMode {
    fn from(kind: EndpointKind) -> Self {
        match kind {
            EndpointKind::PlaybackLoopback => Self::Loopback,
            EndpointKind::DirectInput => Self::Direct,
        }
    }
}

/// An endpoint's answer to "can you stream this exact format?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatSupport {
    Supported,
    /// Rejected, with the endpoint's closest supported alternative.
    ClosestMatch(MixFormat),
    /// Rejected, and no alternative is available.
    Unsupported,
}

/// Platform device enumeration and endpoint opening.
///
/// Implemented by:
/// - `WasapiProvider` (Windows)
/// - `SyntheticProvider` (in-memory, every platform)
pub trait EndpointProvider: Send + Sync {
    /// Active and inactive devices of `kind`, in enumeration order.
    fn enumerate(&self, kind: EndpointKind) -> Result<Vec<DeviceDescriptor>, CaptureError>;

    /// Identifier of the system default device for `kind`, if any.
    fn default_device_id(&self, kind: EndpointKind) -> Result<Option<String>, CaptureError>;

    /// Open the device behind `endpoint`. Dropping the handle releases it.
    fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn AudioEndpoint>, CaptureError>;
}

/// An opened audio endpoint.
///
/// Exclusively owned by one party at a time: the controller while the
/// format is negotiated, then the capture session's poll thread, which is
/// the only code that ever acquires and releases chunks.
pub trait AudioEndpoint: Send {
    /// The endpoint's native shared-mode mix format.
    fn mix_format(&mut self) -> Result<MixFormat, CaptureError>;

    /// Ask whether `format` is accepted in shared mode.
    fn check_format(&mut self, format: &CaptureFormat) -> Result<FormatSupport, CaptureError>;

    /// Prepare the stream for `format` with an internal buffer of roughly
    /// `buffer_duration`. Called once, before `start`.
    fn initialize(
        &mut self,
        format: &CaptureFormat,
        mode: StreamMode,
        buffer_duration: Duration,
    ) -> Result<(), CaptureError>;

    /// Prepare the calling thread to drive the stream (apartment setup,
    /// scheduling class). Called first on the poll thread.
    fn attach_thread(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Undo `attach_thread`. Called last on the poll thread.
    fn detach_thread(&mut self) {}

    fn start(&mut self) -> Result<(), CaptureError>;

    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Discard anything still queued after `stop`.
    fn reset(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Frames in the next queued chunk; zero when the queue is empty.
    fn pending_frames(&mut self) -> Result<u32, CaptureError>;

    /// Borrow the next queued chunk. Must be paired with exactly one
    /// `release_chunk` carrying the same frame count.
    fn acquire_chunk(&mut self) -> Result<Chunk<'_>, CaptureError>;

    fn release_chunk(&mut self, frame_count: u32) -> Result<(), CaptureError>;
}
