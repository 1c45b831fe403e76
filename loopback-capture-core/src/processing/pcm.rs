//! 16-bit PCM conversions between endpoint bytes and normalized floats.

/// Full-scale divisor for normalizing signed 16-bit samples into [-1, 1].
const I16_SCALE: f32 = 32768.0;

/// Downmix interleaved 16-bit little-endian frames to normalized mono by
/// averaging channels per frame, appending exactly `frame_count` samples
/// to `out`.
///
/// Frames missing from a short `data` slice are treated as silence.
pub fn decode_mono_into(data: &[u8], channels: u16, frame_count: usize, out: &mut Vec<f32>) {
    let channels = channels.max(1) as usize;
    let frame_bytes = channels * 2;
    let scale = 1.0 / (channels as f32 * I16_SCALE);

    let available = (data.len() / frame_bytes).min(frame_count);
    out.reserve(frame_count);
    for frame in data.chunks_exact(frame_bytes).take(available) {
        let sum: i32 = frame
            .chunks_exact(2)
            .map(|s| i16::from_le_bytes([s[0], s[1]]) as i32)
            .sum();
        out.push(sum as f32 * scale);
    }
    out.resize(out.len() + (frame_count - available), 0.0);
}

/// Interleaved 16-bit little-endian bytes for `frames` frames of `channels`
/// channels, every sample set to `value`.
pub fn constant_frames(value: i16, channels: u16, frames: usize) -> Vec<u8> {
    let bytes = value.to_le_bytes();
    let total = frames * channels as usize;
    let mut data = Vec::with_capacity(total * 2);
    for _ in 0..total {
        data.extend_from_slice(&bytes);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn stereo_frames_are_averaged() {
        let mut data = Vec::new();
        for s in [16384i16, 0, -16384, -16384] {
            data.extend_from_slice(&s.to_le_bytes());
        }
        let mut out = Vec::new();
        decode_mono_into(&data, 2, 2, &mut out);
        assert_eq!(out.len(), 2);
        assert_abs_diff_eq!(out[0], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], -0.5, epsilon = 1e-6);
    }

    #[test]
    fn mono_passthrough_scale() {
        let data = constant_frames(16384, 1, 3);
        let mut out = Vec::new();
        decode_mono_into(&data, 1, 3, &mut out);
        assert_eq!(out, vec![0.5; 3]);
    }

    #[test]
    fn short_data_is_padded_with_silence() {
        let data = constant_frames(16384, 2, 2);
        let mut out = vec![9.0];
        decode_mono_into(&data, 2, 5, &mut out);
        assert_eq!(out, vec![9.0, 0.5, 0.5, 0.0, 0.0, 0.0]);
    }
}
