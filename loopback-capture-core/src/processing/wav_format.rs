//! RIFF/WAVE header generation and parsing.
//!
//! The header is written provisionally when a recording opens and the two
//! size fields are back-patched once the total length is known.

use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;

/// Size of the standard WAV RIFF header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Offset of the RIFF chunk size (`file size - 8`).
pub const RIFF_SIZE_OFFSET: u64 = 4;

/// Offset of the `data` sub-chunk size.
pub const DATA_SIZE_OFFSET: u64 = 40;

/// Generate a 44-byte WAV RIFF header for 16-bit PCM.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    file size - 8 (36 + data_size)
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16 (PCM format chunk size)
/// [20-21]  1 (PCM format code)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * block_align
/// [32-33]  block_align = channels * bits / 8
/// [34-35]  bits per sample (16)
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &CaptureFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let mut header = [0u8; WAV_HEADER_SIZE];

    // RIFF chunk descriptor
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&riff_size_for_data(data_size as u64).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels().to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate_hz().to_le_bytes());
    header[28..32].copy_from_slice(&format.avg_bytes_per_sec().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align_bytes().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample().to_le_bytes());

    // data sub-chunk
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// RIFF chunk size for a file carrying `data_size` bytes of audio,
/// saturated to the 32-bit field.
pub fn riff_size_for_data(data_size: u64) -> u32 {
    clamp_u32(data_size + WAV_HEADER_SIZE as u64 - 8)
}

/// Data size saturated to the 32-bit field.
pub fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Patch the file-size field at offset 4 (RIFF chunk size = file_size - 8).
pub fn patch_file_size(header: &mut [u8], total_file_size: u64) {
    let chunk_size = clamp_u32(total_file_size.saturating_sub(8));
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
}

/// Patch the data-size field at offset 40.
pub fn patch_data_size(header: &mut [u8], data_size: u64) {
    header[40..44].copy_from_slice(&clamp_u32(data_size).to_le_bytes());
}

/// Fields of a parsed 44-byte PCM header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub riff_size: u32,
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    pub data_size: u32,
}

impl WavHeader {
    /// The capture format this header describes.
    pub fn capture_format(&self) -> Result<CaptureFormat, CaptureError> {
        if self.format_tag != 1 || self.bits_per_sample != 16 {
            return Err(CaptureError::UnsupportedFormat(format!(
                "format tag {} with {} bits is not 16-bit PCM",
                self.format_tag, self.bits_per_sample
            )));
        }
        CaptureFormat::pcm16(self.channels, self.sample_rate)
    }
}

/// Parse the canonical 44-byte header written by `generate_wav_header`.
pub fn parse_wav_header(bytes: &[u8]) -> Result<WavHeader, CaptureError> {
    if bytes.len() < WAV_HEADER_SIZE {
        return Err(CaptureError::IoError(format!(
            "header too short: {} bytes",
            bytes.len()
        )));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" || &bytes[12..16] != b"fmt " || &bytes[36..40] != b"data"
    {
        return Err(CaptureError::IoError("not a canonical RIFF/WAVE header".into()));
    }

    let u16_at = |o: usize| u16::from_le_bytes([bytes[o], bytes[o + 1]]);
    let u32_at = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);

    Ok(WavHeader {
        riff_size: u32_at(4),
        format_tag: u16_at(20),
        channels: u16_at(22),
        sample_rate: u32_at(24),
        byte_rate: u32_at(28),
        block_align: u16_at(32),
        bits_per_sample: u16_at(34),
        data_size: u32_at(40),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_48k() -> CaptureFormat {
        CaptureFormat::pcm16(2, 48000).unwrap()
    }

    #[test]
    fn header_riff_magic() {
        let header = generate_wav_header(&stereo_48k(), 0);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
    }

    #[test]
    fn header_48khz_stereo_fields() {
        let header = parse_wav_header(&generate_wav_header(&stereo_48k(), 9600)).unwrap();
        assert_eq!(header.format_tag, 1);
        assert_eq!(header.channels, 2);
        assert_eq!(header.sample_rate, 48000);
        assert_eq!(header.byte_rate, 192000);
        assert_eq!(header.block_align, 4);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(header.data_size, 9600);
        assert_eq!(header.riff_size, 36 + 9600);
        assert_eq!(header.capture_format().unwrap(), stereo_48k());
    }

    #[test]
    fn fmt_chunk_size_is_16() {
        let header = generate_wav_header(&stereo_48k(), 0);
        assert_eq!(u32::from_le_bytes([header[16], header[17], header[18], header[19]]), 16);
    }

    #[test]
    fn patch_sizes() {
        let mut header = generate_wav_header(&stereo_48k(), 0);
        patch_data_size(&mut header, 19200);
        patch_file_size(&mut header, 19200 + 44);

        let parsed = parse_wav_header(&header).unwrap();
        assert_eq!(parsed.data_size, 19200);
        assert_eq!(parsed.riff_size, 19200 + 36);
    }

    #[test]
    fn oversized_lengths_saturate() {
        let mut header = generate_wav_header(&stereo_48k(), 0);
        patch_data_size(&mut header, u32::MAX as u64 + 10);
        assert_eq!(parse_wav_header(&header).unwrap().data_size, u32::MAX);
        assert_eq!(riff_size_for_data(u32::MAX as u64), u32::MAX);
    }

    #[test]
    fn rejects_non_wav_bytes() {
        assert!(parse_wav_header(b"RIFF").is_err());
        assert!(parse_wav_header(&[0u8; 44]).is_err());
    }
}
