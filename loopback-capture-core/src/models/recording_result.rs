use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::endpoint::{Endpoint, EndpointKind};
use super::format::CaptureFormat;

/// Result returned when a recording segment is finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub format: CaptureFormat,
    pub frames: u64,
    /// Bytes after the 44-byte header.
    pub data_bytes: u64,
    pub duration_secs: f64,
    /// SHA-256 of the finalized file, lowercase hex.
    pub checksum: String,
    pub metadata: RecordingMetadata,
}

/// Metadata describing a recording, serializable as a JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub created_at: String,
    pub file_path: String,
    pub duration_secs: f64,
    pub checksum: String,
    pub endpoint_name: String,
    pub endpoint_kind: EndpointKind,
    pub channels: u16,
    pub sample_rate_hz: u32,
    pub bits_per_sample: u16,
}

impl RecordingMetadata {
    pub fn new(
        file_path: &str,
        duration_secs: f64,
        checksum: &str,
        endpoint: &Endpoint,
        format: &CaptureFormat,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            file_path: file_path.to_string(),
            duration_secs,
            checksum: checksum.to_string(),
            endpoint_name: endpoint.display_name.clone(),
            endpoint_kind: endpoint.kind,
            channels: format.channels(),
            sample_rate_hz: format.sample_rate_hz(),
            bits_per_sample: format.bits_per_sample(),
        }
    }
}
