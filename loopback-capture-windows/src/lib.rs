//! # loopback-capture-windows
//!
//! Windows WASAPI backend for loopback-capture.
//!
//! Provides:
//! - `WasapiProvider`: endpoint enumeration via the MMDevice API
//! - `WasapiEndpoint`: shared-mode loopback (render) and direct (capture) streams
//!
//! ## Platform Requirements
//! - Windows 10 or later
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use loopback_capture_core::{EndpointKind, EngineConfig, SessionController};
//! use loopback_capture_windows::WasapiProvider;
//!
//! let controller = SessionController::new(Arc::new(WasapiProvider::new()?), EngineConfig::default())?;
//! controller.select_default_device(EndpointKind::PlaybackLoopback)?;
//! controller.start_capture()?;
//! ```

#[cfg(target_os = "windows")]
mod com;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod error;
#[cfg(target_os = "windows")]
pub mod wasapi_endpoint;

#[cfg(target_os = "windows")]
pub use device_enumerator::WasapiProvider;
#[cfg(target_os = "windows")]
pub use error::WasapiError;
#[cfg(target_os = "windows")]
pub use wasapi_endpoint::WasapiEndpoint;
