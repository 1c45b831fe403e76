use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Configuration for the capture engine.
///
/// Every field has a default, so a partial JSON document is enough to
/// override a single knob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Waveform ring-buffer capacity in mono samples (default: 48000, about
    /// one second at 48 kHz). Allocated once, never resized.
    pub waveform_capacity: usize,

    /// Level-meter RMS window in milliseconds (default: 20).
    pub level_window_ms: u64,

    /// Sleep between drains of the endpoint queue (default: 10).
    pub poll_interval_ms: u64,

    /// Internal endpoint buffer requested at start (default: 1000).
    pub endpoint_buffer_ms: u64,

    /// Bounded wait for the capture thread to exit on stop (default: 500).
    pub stop_timeout_ms: u64,

    /// Bounded wait for the capture thread to report a started endpoint
    /// (default: 2000).
    pub start_timeout_ms: u64,

    /// Chunks the recording queue holds before the producer blocks
    /// (default: 64).
    pub writer_queue_depth: usize,

    /// Directory for numbered recordings (default: current directory).
    pub output_directory: PathBuf,

    /// Write `<recording>.metadata.json` when a recording is finalized.
    pub write_metadata_sidecar: bool,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.waveform_capacity == 0 {
            return Err("waveform capacity must be positive".into());
        }
        if self.level_window_ms == 0 {
            return Err("level window must be positive".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll interval must be positive".into());
        }
        if self.endpoint_buffer_ms == 0 {
            return Err("endpoint buffer duration must be positive".into());
        }
        if self.stop_timeout_ms == 0 || self.start_timeout_ms == 0 {
            return Err("start/stop timeouts must be positive".into());
        }
        if self.writer_queue_depth == 0 {
            return Err("writer queue depth must be positive".into());
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("invalid config: {}", e)))?;
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn endpoint_buffer(&self) -> Duration {
        Duration::from_millis(self.endpoint_buffer_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            waveform_capacity: 48000,
            level_window_ms: 20,
            poll_interval_ms: 10,
            endpoint_buffer_ms: 1000,
            stop_timeout_ms: 500,
            start_timeout_ms: 2000,
            writer_queue_depth: 64,
            output_directory: PathBuf::from("."),
            write_metadata_sidecar: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = EngineConfig {
            waveform_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "poll_interval_ms": 5, "write_metadata_sidecar": true }"#).unwrap();
        assert_eq!(config.poll_interval_ms, 5);
        assert!(config.write_metadata_sidecar);
        assert_eq!(config.waveform_capacity, 48000);
        assert_eq!(config.stop_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn invalid_json_values_are_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "writer_queue_depth": 0 }"#).unwrap_err();
        assert!(matches!(err, CaptureError::ConfigurationFailed(_)));

        let err = EngineConfig::from_json_str("not json").unwrap_err();
        assert!(matches!(err, CaptureError::ConfigurationFailed(_)));
    }
}
