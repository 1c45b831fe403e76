use serde::Serialize;

use super::endpoint::Endpoint;
use super::format::CaptureFormat;

/// Session controller state machine.
///
/// State transitions:
/// ```text
/// ready ──startCapture──→ capturing ──startRecording──→ recording
///   ↑                      │    ↑                          │
///   └──────stopCapture─────┘    └──────stopRecording───────┘
///
/// ready ──selectDevice──→ switchingDevice ──→ ready
/// ```
/// `stopCapture` from `recording` finalizes the recording first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Ready,
    Capturing,
    Recording,
    SwitchingDevice,
}

impl ControllerState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// True while a capture producer runs, including while recording.
    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing | Self::Recording)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_switching(&self) -> bool {
        matches!(self, Self::SwitchingDevice)
    }
}

/// Point-in-time view of the controller.
///
/// `recording` implies `capturing`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub capturing: bool,
    pub recording: bool,
    pub active_endpoint: Option<Endpoint>,
    pub active_format: Option<CaptureFormat>,
}

/// Lifecycle of a single capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureStatus {
    Idle,
    Starting,
    Running,
    Stopping,
}
