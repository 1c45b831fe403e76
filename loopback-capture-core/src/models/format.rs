use std::fmt;

use serde::Serialize;

use super::error::CaptureError;

/// Bit depth of every negotiated capture format.
pub const CAPTURE_BITS_PER_SAMPLE: u16 = 16;

/// A negotiated 16-bit PCM capture format.
///
/// Fields derived from `channels` and `sample_rate_hz` are computed on
/// construction and cannot drift from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CaptureFormat {
    channels: u16,
    sample_rate_hz: u32,
}

impl CaptureFormat {
    /// Build a 16-bit PCM format. Fails on zero channels, a zero rate, or a
    /// combination whose block align or byte rate does not fit the WAV
    /// header fields.
    pub fn pcm16(channels: u16, sample_rate_hz: u32) -> Result<Self, CaptureError> {
        if channels == 0 {
            return Err(CaptureError::UnsupportedFormat("channel count must be at least 1".into()));
        }
        if sample_rate_hz == 0 {
            return Err(CaptureError::UnsupportedFormat("sample rate must be positive".into()));
        }
        let block_align = channels
            .checked_mul(CAPTURE_BITS_PER_SAMPLE / 8)
            .ok_or_else(|| CaptureError::UnsupportedFormat(format!("{} channels is too many", channels)))?;
        if sample_rate_hz.checked_mul(block_align as u32).is_none() {
            return Err(CaptureError::UnsupportedFormat(format!(
                "{} Hz with {} channels exceeds the WAV byte rate",
                sample_rate_hz, channels
            )));
        }
        Ok(Self {
            channels,
            sample_rate_hz,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn bits_per_sample(&self) -> u16 {
        CAPTURE_BITS_PER_SAMPLE
    }

    /// Bytes per interleaved frame: `channels * bits_per_sample / 8`.
    pub fn block_align_bytes(&self) -> u16 {
        self.channels * (CAPTURE_BITS_PER_SAMPLE / 8)
    }

    /// `sample_rate_hz * block_align_bytes`.
    pub fn avg_bytes_per_sec(&self) -> u32 {
        self.sample_rate_hz * self.block_align_bytes() as u32
    }

    /// Byte length of `frames` interleaved frames in this format.
    pub fn bytes_for_frames(&self, frames: u32) -> u64 {
        frames as u64 * self.block_align_bytes() as u64
    }

    /// Number of frames covering `millis` milliseconds, rounded down and
    /// saturating on overflow.
    pub fn frames_for_millis(&self, millis: u64) -> usize {
        let frames = (self.sample_rate_hz as u64).saturating_mul(millis) / 1000;
        usize::try_from(frames).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit PCM",
            self.sample_rate_hz, self.channels, CAPTURE_BITS_PER_SAMPLE
        )
    }
}

/// Sample encoding of an endpoint's native or closest-match format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    Integer,
    Float,
}

/// An endpoint's native mix format or a closest-match suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MixFormat {
    pub channels: u16,
    pub sample_rate_hz: u32,
    pub bits_per_sample: u16,
    pub encoding: SampleEncoding,
}

impl MixFormat {
    pub fn float32(channels: u16, sample_rate_hz: u32) -> Self {
        Self {
            channels,
            sample_rate_hz,
            bits_per_sample: 32,
            encoding: SampleEncoding::Float,
        }
    }

    pub fn pcm16(channels: u16, sample_rate_hz: u32) -> Self {
        Self {
            channels,
            sample_rate_hz,
            bits_per_sample: CAPTURE_BITS_PER_SAMPLE,
            encoding: SampleEncoding::Integer,
        }
    }

    /// Whether this format can be adopted verbatim as a capture format.
    pub fn is_pcm16(&self) -> bool {
        self.encoding == SampleEncoding::Integer && self.bits_per_sample == CAPTURE_BITS_PER_SAMPLE
    }
}
