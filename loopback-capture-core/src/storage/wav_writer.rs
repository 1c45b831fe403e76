use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::chunk::Chunk;
use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::processing::wav_format::{self, WavHeader, WAV_HEADER_SIZE};

const ZEROS: [u8; 4096] = [0u8; 4096];

/// Streaming 16-bit PCM WAV file for one recording segment.
///
/// ## File Format
/// ```text
/// [44-byte WAV header, size fields provisional until close]
/// [raw interleaved 16-bit PCM data...]
/// ```
///
/// The header cannot be completed while streaming, so `close` seeks back
/// and patches both size fields. A file that is never closed keeps its
/// placeholder sizes but all audio bytes; `repair_unfinalized` re-derives
/// the sizes from the file length.
pub struct RecordingFile {
    file_path: PathBuf,
    format: CaptureFormat,
    file: Option<BufWriter<File>>,
    bytes_written: u64,
}

/// A closed, finalized recording file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedFile {
    pub file_path: PathBuf,
    pub format: CaptureFormat,
    pub data_bytes: u64,
    pub frames: u64,
}

impl RecordingFile {
    /// Create the file (and its parent directory) and write the provisional
    /// header.
    pub fn open(file_path: impl Into<PathBuf>, format: CaptureFormat) -> Result<Self, CaptureError> {
        let file_path = file_path.into();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| CaptureError::IoError(format!("failed to create directory: {}", e)))?;
        }

        let file = File::create(&file_path).map_err(|e| {
            CaptureError::IoError(format!("failed to create {}: {}", file_path.display(), e))
        })?;

        let mut recording = Self {
            file_path,
            format,
            file: Some(BufWriter::new(file)),
            bytes_written: 0,
        };

        let header = wav_format::generate_wav_header(&format, 0);
        recording.write_raw(&header)?;
        Ok(recording)
    }

    /// Append one chunk: `frame_count * block_align` bytes, either the
    /// chunk's samples or zeros for a silent chunk.
    ///
    /// Returns the number of bytes appended.
    pub fn append(&mut self, chunk: &Chunk<'_>) -> Result<u64, CaptureError> {
        let expected = self.format.bytes_for_frames(chunk.frame_count());
        if chunk.is_silent() {
            self.write_zeros(expected)?;
            return Ok(expected);
        }

        let data = chunk.data();
        let take = (data.len() as u64).min(expected) as usize;
        self.write_raw(&data[..take])?;
        if (take as u64) < expected {
            log::warn!(
                "chunk carried {} of {} expected bytes; padding with silence",
                take,
                expected
            );
            self.write_zeros(expected - take as u64)?;
        }
        Ok(expected)
    }

    /// Finalize the file: patch the RIFF and data sizes, flush, and close.
    pub fn close(mut self) -> Result<FinalizedFile, CaptureError> {
        let writer = self
            .file
            .take()
            .ok_or_else(|| CaptureError::IoError("file is not open".into()))?;
        let mut file = writer
            .into_inner()
            .map_err(|e| CaptureError::IoError(format!("flush failed: {}", e.error())))?;

        let data_bytes = self.data_bytes();
        let riff_size = wav_format::clamp_u32(self.bytes_written - 8);
        let data_size = wav_format::clamp_u32(data_bytes);
        if data_size as u64 != data_bytes {
            log::warn!(
                "{} exceeds the 4 GiB WAV limit; declared sizes are saturated",
                self.file_path.display()
            );
        }

        file.seek(SeekFrom::Start(wav_format::RIFF_SIZE_OFFSET))?;
        file.write_all(&riff_size.to_le_bytes())?;
        file.seek(SeekFrom::Start(wav_format::DATA_SIZE_OFFSET))?;
        file.write_all(&data_size.to_le_bytes())?;
        file.flush()?;

        Ok(FinalizedFile {
            file_path: self.file_path.clone(),
            format: self.format,
            data_bytes,
            frames: data_bytes / self.format.block_align_bytes() as u64,
        })
    }

    /// Total bytes written so far, including the header.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Audio bytes written so far, excluding the header.
    pub fn data_bytes(&self) -> u64 {
        self.bytes_written - WAV_HEADER_SIZE as u64
    }

    pub fn frames_written(&self) -> u64 {
        self.data_bytes() / self.format.block_align_bytes() as u64
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    fn write_zeros(&mut self, mut count: u64) -> Result<(), CaptureError> {
        while count > 0 {
            let n = count.min(ZEROS.len() as u64) as usize;
            self.write_raw(&ZEROS[..n])?;
            count -= n as u64;
        }
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CaptureError::IoError("file is not open".into()))?;
        file.write_all(data)
            .map_err(|e| CaptureError::IoError(format!("write failed: {}", e)))?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }
}

/// Re-derive the size fields of a recording that was never closed from its
/// length on disk. Returns the repaired header.
pub fn repair_unfinalized(path: &Path) -> Result<WavHeader, CaptureError> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let mut header = [0u8; WAV_HEADER_SIZE];
    file.read_exact(&mut header)?;
    wav_format::parse_wav_header(&header)?;

    let file_len = file.metadata()?.len();
    let data_len = file_len - WAV_HEADER_SIZE as u64;
    wav_format::patch_file_size(&mut header, file_len);
    wav_format::patch_data_size(&mut header, data_len);

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    file.flush()?;
    log::info!("repaired header of {} ({} data bytes)", path.display(), data_len);
    wav_format::parse_wav_header(&header)
}

/// Compute the SHA-256 hex digest of a file.
pub fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let mut file = File::open(path)
        .map_err(|e| CaptureError::IoError(format!("failed to read file for checksum: {}", e)))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::pcm;

    fn temp_file_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("loopback_capture_test_{}_{}", uuid::Uuid::new_v4(), name))
    }

    fn stereo_48k() -> CaptureFormat {
        CaptureFormat::pcm16(2, 48000).unwrap()
    }

    fn read_header(path: &Path) -> WavHeader {
        let data = fs::read(path).unwrap();
        wav_format::parse_wav_header(&data).unwrap()
    }

    #[test]
    fn header_round_trip_after_close() {
        let path = temp_file_path("roundtrip.wav");
        let format = stereo_48k();
        let mut recording = RecordingFile::open(&path, format).unwrap();

        let frames = 960u32;
        let data = pcm::constant_frames(1000, 2, frames as usize);
        for half in data.chunks(data.len() / 2) {
            recording.append(&Chunk::audio(half, frames / 2)).unwrap();
        }
        let finalized = recording.close().unwrap();
        assert_eq!(finalized.frames, frames as u64);

        let file_size = fs::metadata(&path).unwrap().len();
        let header = read_header(&path);
        assert_eq!(header.data_size as u64, frames as u64 * format.block_align_bytes() as u64);
        assert_eq!(header.riff_size as u64, file_size - 8);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn silent_chunk_writes_zero_bytes() {
        let path = temp_file_path("silent.wav");
        let format = stereo_48k();
        let mut recording = RecordingFile::open(&path, format).unwrap();
        assert_eq!(recording.bytes_written(), 44);

        let appended = recording.append(&Chunk::silent(480)).unwrap();
        assert_eq!(appended, 480 * 4);
        assert_eq!(recording.bytes_written(), 44 + 480 * 4);
        recording.close().unwrap();

        let file_data = fs::read(&path).unwrap();
        assert_eq!(file_data.len(), 44 + 480 * 4);
        assert!(file_data[44..].iter().all(|&b| b == 0));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn short_chunk_is_padded_and_long_chunk_truncated() {
        let path = temp_file_path("padding.wav");
        let format = CaptureFormat::pcm16(1, 8000).unwrap();
        let mut recording = RecordingFile::open(&path, format).unwrap();

        recording.append(&Chunk::audio(&[1, 1], 3)).unwrap();
        recording.append(&Chunk::audio(&[2, 2, 2, 2, 2, 2], 1)).unwrap();
        assert_eq!(recording.frames_written(), 4);
        recording.close().unwrap();

        let file_data = fs::read(&path).unwrap();
        assert_eq!(&file_data[44..], &[1, 1, 0, 0, 0, 0, 2, 2]);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn open_fails_for_unwritable_path() {
        let blocker = temp_file_path("blocker");
        fs::write(&blocker, b"x").unwrap();
        // A regular file cannot serve as a parent directory.
        let result = RecordingFile::open(blocker.join("nested.wav"), stereo_48k());
        assert!(matches!(result, Err(CaptureError::IoError(_))));
        fs::remove_file(&blocker).ok();
    }

    #[test]
    fn unfinalized_file_can_be_repaired() {
        let path = temp_file_path("crashed.wav");
        {
            let mut recording = RecordingFile::open(&path, stereo_48k()).unwrap();
            recording.append(&Chunk::silent(100)).unwrap();
            // Dropped without close: sizes stay at their placeholders.
        }
        assert_eq!(read_header(&path).data_size, 0);

        let repaired = repair_unfinalized(&path).unwrap();
        assert_eq!(repaired.data_size, 400);
        assert_eq!(read_header(&path).riff_size, 400 + 36);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn checksum_is_stable_hex() {
        let path = temp_file_path("checksum.bin");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        fs::remove_file(&path).ok();
    }
}
