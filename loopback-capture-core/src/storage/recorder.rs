//! Recording sink: a writer thread fed through a bounded queue.
//!
//! The capture thread hands each chunk to the writer through the shared
//! [`RecordingSlot`]. The queue is bounded and sends block when it is full,
//! so the producer slows down instead of dropping audio. Chunks reach the
//! file in arrival order because there is exactly one producer.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::models::chunk::Chunk;
use crate::models::endpoint::Endpoint;
use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::models::recording_result::{RecordingMetadata, RecordingResult};
use crate::storage::metadata;
use crate::storage::wav_writer::{self, RecordingFile};
use crate::traits::observer::SessionObserver;

static NEXT_TAP_ID: AtomicU64 = AtomicU64::new(1);

/// Slot through which the capture thread finds the active recorder, if any.
pub type RecordingSlot = Arc<Mutex<Option<RecorderTap>>>;

/// A chunk copied off the endpoint buffer for the writer thread.
#[derive(Debug)]
enum RecordedChunk {
    Samples { data: Vec<u8>, frames: u32 },
    Silence { frames: u32 },
}

impl RecordedChunk {
    fn from_chunk(chunk: &Chunk<'_>, format: &CaptureFormat) -> Self {
        if chunk.is_silent() {
            return Self::Silence {
                frames: chunk.frame_count(),
            };
        }
        let expected = format.bytes_for_frames(chunk.frame_count()) as usize;
        let data = chunk.data();
        Self::Samples {
            data: data[..data.len().min(expected)].to_vec(),
            frames: chunk.frame_count(),
        }
    }

    fn as_chunk(&self) -> Chunk<'_> {
        match self {
            Self::Samples { data, frames } => Chunk::audio(data, *frames),
            Self::Silence { frames } => Chunk::silent(*frames),
        }
    }
}

/// Producer end of an active recording.
#[derive(Debug, Clone)]
pub struct RecorderTap {
    id: u64,
    sender: SyncSender<RecordedChunk>,
    format: CaptureFormat,
}

/// Hand `chunk` to the active recorder, if there is one.
///
/// The slot lock is held only long enough to clone the sender; the copy and
/// the (possibly blocking) send happen outside it. Returns whether the chunk
/// was queued. A writer that has gone away detaches itself from the slot.
pub(crate) fn offer_chunk(slot: &Mutex<Option<RecorderTap>>, chunk: &Chunk<'_>) -> bool {
    let Some(tap) = slot.lock().clone() else {
        return false;
    };

    let recorded = RecordedChunk::from_chunk(chunk, &tap.format);
    if tap.sender.send(recorded).is_err() {
        log::warn!("recording writer has stopped; detaching it from the capture stream");
        let mut guard = slot.lock();
        if guard.as_ref().is_some_and(|t| t.id == tap.id) {
            *guard = None;
        }
        return false;
    }
    true
}

/// An in-progress recording segment.
pub struct Recorder {
    file_path: PathBuf,
    slot: RecordingSlot,
    handle: Option<thread::JoinHandle<Result<RecordingResult, CaptureError>>>,
}

impl Recorder {
    /// Create the file, start the writer thread, and attach it to `slot`.
    ///
    /// Fails with `IoError` if the file cannot be created or the writer
    /// cannot be started; nothing is attached and no file is left behind in
    /// that case.
    pub fn start(
        file_path: PathBuf,
        format: CaptureFormat,
        endpoint: &Endpoint,
        slot: RecordingSlot,
        queue_depth: usize,
        write_sidecar: bool,
        observer: Option<Arc<dyn SessionObserver>>,
    ) -> Result<Self, CaptureError> {
        if slot.lock().is_some() {
            return Err(CaptureError::InvalidState("a recording is already attached".into()));
        }

        let file = RecordingFile::open(&file_path, format)?;
        let (sender, receiver) = sync_channel(queue_depth.max(1));
        let endpoint = endpoint.clone();

        let handle = thread::Builder::new()
            .name("recording-writer".into())
            .spawn(move || writer_loop(file, receiver, endpoint, write_sidecar, observer))
            .map_err(|e| discard_unstarted(&file_path, e))?;

        *slot.lock() = Some(RecorderTap {
            id: NEXT_TAP_ID.fetch_add(1, Ordering::Relaxed),
            sender,
            format,
        });
        log::info!("recording to {} ({})", file_path.display(), format);

        Ok(Self {
            file_path,
            slot,
            handle: Some(handle),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Whether the writer thread has already exited (only happens early on
    /// a write failure).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Detach from the capture stream, let the writer drain its queue, and
    /// return the finalized result.
    pub fn finish(mut self) -> Result<RecordingResult, CaptureError> {
        self.detach_and_join()
    }

    fn detach_and_join(&mut self) -> Result<RecordingResult, CaptureError> {
        // Dropping the last sender ends the writer's receive loop once the
        // queued chunks are written.
        self.slot.lock().take();
        let handle = self
            .handle
            .take()
            .ok_or_else(|| CaptureError::InvalidState("recording already finished".into()))?;
        handle
            .join()
            .map_err(|_| CaptureError::IoError("recording writer thread panicked".into()))?
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.detach_and_join() {
                log::error!("failed to finalize {}: {}", self.file_path.display(), e);
            }
        }
    }
}

/// Remove a freshly created file whose writer never started.
fn discard_unstarted(file_path: &Path, err: std::io::Error) -> CaptureError {
    if let Err(e) = fs::remove_file(file_path) {
        log::warn!("could not remove unstarted recording {}: {}", file_path.display(), e);
    }
    CaptureError::IoError(format!("failed to spawn writer thread: {}", err))
}

fn writer_loop(
    mut file: RecordingFile,
    receiver: Receiver<RecordedChunk>,
    endpoint: Endpoint,
    write_sidecar: bool,
    observer: Option<Arc<dyn SessionObserver>>,
) -> Result<RecordingResult, CaptureError> {
    while let Ok(recorded) = receiver.recv() {
        if let Err(e) = file.append(&recorded.as_chunk()) {
            log::error!("recording to {} aborted: {}", file.file_path().display(), e);
            drop(receiver);
            // Keep whatever made it to disk readable.
            if let Err(close_err) = file.close() {
                log::warn!("could not finalize aborted recording: {}", close_err);
            }
            if let Some(ref o) = observer {
                o.on_error(&e);
            }
            return Err(e);
        }
    }

    finalize(file, &endpoint, write_sidecar)
}

fn finalize(file: RecordingFile, endpoint: &Endpoint, write_sidecar: bool) -> Result<RecordingResult, CaptureError> {
    let finalized = file.close()?;
    let checksum = wav_writer::sha256_file(&finalized.file_path)?;
    let duration_secs = finalized.frames as f64 / finalized.format.sample_rate_hz() as f64;

    let metadata = RecordingMetadata::new(
        &finalized.file_path.to_string_lossy(),
        duration_secs,
        &checksum,
        endpoint,
        &finalized.format,
    );

    if write_sidecar {
        if let Err(e) = metadata::write_metadata(&metadata, &finalized.file_path) {
            log::warn!("recording kept without metadata sidecar: {}", e);
        }
    }

    log::info!(
        "finalized {} ({} frames, {:.2}s)",
        finalized.file_path.display(),
        finalized.frames,
        duration_secs
    );

    Ok(RecordingResult {
        file_path: finalized.file_path,
        format: finalized.format,
        frames: finalized.frames,
        data_bytes: finalized.data_bytes,
        duration_secs,
        checksum,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::endpoint::EndpointKind;
    use crate::processing::pcm;
    use crate::processing::wav_format;
    use std::io;

    fn temp_file_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("loopback_capture_test_{}_{}", uuid::Uuid::new_v4(), name))
    }

    fn endpoint() -> Endpoint {
        Endpoint {
            id: "mic".into(),
            display_name: "Microphone".into(),
            kind: EndpointKind::DirectInput,
            is_system_default: false,
            ordinal: 1,
        }
    }

    #[test]
    fn offer_without_recorder_is_a_no_op() {
        let slot: RecordingSlot = Arc::default();
        assert!(!offer_chunk(&slot, &Chunk::silent(10)));
    }

    #[test]
    fn every_chunk_arrives_in_order_through_a_tiny_queue() {
        let path = temp_file_path("ordered.wav");
        let format = CaptureFormat::pcm16(1, 8000).unwrap();
        let slot: RecordingSlot = Arc::default();
        let recorder = Recorder::start(path.clone(), format, &endpoint(), Arc::clone(&slot), 1, false, None).unwrap();

        let producer_slot = Arc::clone(&slot);
        let producer = thread::spawn(move || {
            for i in 0..200i16 {
                let data = pcm::constant_frames(i, 1, 4);
                assert!(offer_chunk(&producer_slot, &Chunk::audio(&data, 4)));
            }
        });
        producer.join().unwrap();

        let result = recorder.finish().unwrap();
        assert_eq!(result.frames, 800);
        assert_eq!(result.data_bytes, 1600);
        assert!((result.duration_secs - 0.1).abs() < 1e-9);
        assert!(slot.lock().is_none());

        let bytes = fs::read(&path).unwrap();
        let header = wav_format::parse_wav_header(&bytes).unwrap();
        assert_eq!(header.data_size, 1600);
        for (i, frame) in bytes[44..].chunks_exact(8).enumerate() {
            assert_eq!(i16::from_le_bytes([frame[0], frame[1]]), i as i16);
        }
        fs::remove_file(&path).ok();
    }

    #[test]
    fn second_recorder_on_same_slot_is_rejected() {
        let first_path = temp_file_path("first.wav");
        let second_path = temp_file_path("second.wav");
        let format = CaptureFormat::pcm16(2, 48000).unwrap();
        let slot: RecordingSlot = Arc::default();

        let first = Recorder::start(first_path.clone(), format, &endpoint(), Arc::clone(&slot), 4, false, None).unwrap();
        let second = Recorder::start(second_path.clone(), format, &endpoint(), Arc::clone(&slot), 4, false, None);
        assert!(matches!(second, Err(CaptureError::InvalidState(_))));
        assert!(!second_path.exists());

        first.finish().unwrap();
        fs::remove_file(&first_path).ok();
    }

    #[test]
    fn dropping_a_recorder_finalizes_the_file() {
        let path = temp_file_path("dropped.wav");
        let format = CaptureFormat::pcm16(2, 48000).unwrap();
        let slot: RecordingSlot = Arc::default();
        {
            let _recorder = Recorder::start(path.clone(), format, &endpoint(), Arc::clone(&slot), 4, false, None).unwrap();
            assert!(offer_chunk(&slot, &Chunk::silent(480)));
        }
        let bytes = fs::read(&path).unwrap();
        assert_eq!(wav_format::parse_wav_header(&bytes).unwrap().data_size, 480 * 4);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn unstarted_writer_leaves_no_file_behind() {
        let path = temp_file_path("unstarted.wav");
        let format = CaptureFormat::pcm16(2, 48000).unwrap();
        drop(RecordingFile::open(&path, format).unwrap());
        assert!(path.exists());

        let err = discard_unstarted(&path, io::Error::new(io::ErrorKind::OutOfMemory, "no threads"));
        assert!(matches!(err, CaptureError::IoError(ref msg) if msg.contains("no threads")));
        assert!(!path.exists());
    }

    #[test]
    fn sidecar_is_written_when_requested() {
        let path = temp_file_path("sidecar.wav");
        let format = CaptureFormat::pcm16(2, 48000).unwrap();
        let slot: RecordingSlot = Arc::default();
        let recorder = Recorder::start(path.clone(), format, &endpoint(), Arc::clone(&slot), 4, true, None).unwrap();
        offer_chunk(&slot, &Chunk::silent(48));
        let result = recorder.finish().unwrap();

        let loaded = metadata::read_metadata(&path).unwrap();
        assert_eq!(loaded.checksum, result.checksum);
        assert_eq!(loaded.endpoint_name, "Microphone");

        fs::remove_file(metadata::metadata_path(&path)).ok();
        fs::remove_file(&path).ok();
    }
}
