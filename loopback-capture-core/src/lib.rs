//! # loopback-capture-core
//!
//! Platform-agnostic capture engine for playback-loopback and direct-input
//! audio endpoints.
//!
//! Enumerates endpoints, negotiates a 16-bit PCM format, runs a single poll
//! thread per capture session that feeds a waveform ring buffer and an
//! optional WAV recording, and drives it all through one state machine.
//! Platform backends (Windows WASAPI, or the in-memory synthetic backend)
//! implement the `EndpointProvider` and `AudioEndpoint` traits.
//!
//! ## Architecture
//!
//! ```text
//! loopback-capture-core (this crate)
//! ├── traits/       ← EndpointProvider, AudioEndpoint, SessionObserver
//! ├── models/       ← CaptureError, CaptureFormat, Endpoint, Chunk, EngineConfig, states
//! ├── processing/   ← WaveformBuffer, PCM decoding, WAV header generation
//! ├── session/      ← EndpointDirectory, negotiator, CaptureSession, SessionController
//! ├── storage/      ← RecordingFile, Recorder (writer thread), metadata
//! └── backends/     ← SyntheticProvider
//! ```

pub mod backends;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use backends::synthetic::{SyntheticDevice, SyntheticFeed, SyntheticProvider};
pub use models::chunk::Chunk;
pub use models::config::EngineConfig;
pub use models::diagnostics::CaptureDiagnostics;
pub use models::endpoint::{DeviceDescriptor, Endpoint, EndpointKind};
pub use models::error::CaptureError;
pub use models::format::{CaptureFormat, MixFormat, SampleEncoding};
pub use models::recording_result::{RecordingMetadata, RecordingResult};
pub use models::state::{CaptureStatus, ControllerState, SessionState};
pub use processing::ring_buffer::{RingBuffer, WaveformBuffer};
pub use session::capture::CaptureSession;
pub use session::controller::SessionController;
pub use session::directory::EndpointDirectory;
pub use storage::recorder::Recorder;
pub use storage::wav_writer::RecordingFile;
pub use traits::endpoint::{AudioEndpoint, EndpointProvider, FormatSupport, StreamMode};
pub use traits::observer::SessionObserver;
