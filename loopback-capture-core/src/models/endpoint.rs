use std::fmt;

use serde::{Deserialize, Serialize};

/// Which capture semantics an endpoint is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Capture the mixed output of a playback (render) device.
    PlaybackLoopback,
    /// Capture directly from an input (microphone/line-in) device.
    DirectInput,
}

impl EndpointKind {
    pub fn is_loopback(self) -> bool {
        matches!(self, Self::PlaybackLoopback)
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PlaybackLoopback => f.write_str("playback loopback"),
            Self::DirectInput => f.write_str("direct input"),
        }
    }
}

/// An audio endpoint from one enumeration snapshot.
///
/// `ordinal` is only meaningful against the listing it came from; the OS
/// device topology may change between listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Backend-specific stable device identifier used to re-open the device.
    pub id: String,
    pub display_name: String,
    pub kind: EndpointKind,
    pub is_system_default: bool,
    pub ordinal: usize,
}

/// Raw device entry as reported by a backend, before the directory assigns
/// ordinals, placeholder names, and the default marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: String,
    /// `None` when the backend could not resolve a human-readable name.
    pub name: Option<String>,
    pub is_active: bool,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            is_active: true,
        }
    }
}
