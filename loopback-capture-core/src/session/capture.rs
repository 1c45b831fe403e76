//! The capture session: one poll thread per running endpoint.
//!
//! The thread owns the endpoint handle outright. Each iteration sleeps for
//! the poll interval, then drains every queued chunk, fanning each one out
//! to the waveform buffer and, when attached, the recorder. Every acquired
//! chunk is released exactly once before the next acquire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::chunk::Chunk;
use crate::models::config::EngineConfig;
use crate::models::diagnostics::{CaptureCounters, CaptureDiagnostics};
use crate::models::endpoint::Endpoint;
use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::models::state::CaptureStatus;
use crate::processing::pcm;
use crate::processing::ring_buffer::WaveformBuffer;
use crate::storage::recorder::{self, RecordingSlot};
use crate::traits::endpoint::{AudioEndpoint, StreamMode};

/// Everything the poll thread shares with the rest of the engine.
struct Sinks {
    waveform: Arc<WaveformBuffer>,
    recording: RecordingSlot,
    counters: Arc<CaptureCounters>,
}

/// A running capture stream.
pub struct CaptureSession {
    endpoint: Endpoint,
    format: CaptureFormat,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<CaptureStatus>>,
    counters: Arc<CaptureCounters>,
    handle: Option<thread::JoinHandle<()>>,
    // Disconnects when the poll thread has fully exited.
    exited: Option<mpsc::Receiver<()>>,
    stop_timeout: Duration,
}

impl CaptureSession {
    /// Initialize `handle` for `format` and start streaming on a new poll
    /// thread.
    ///
    /// Returns once the thread has started the stream. Any setup failure
    /// (initialize, thread attach, start, or no ack within the start
    /// timeout) is returned here and the handle is released.
    pub fn start(
        mut handle: Box<dyn AudioEndpoint>,
        endpoint: &Endpoint,
        format: CaptureFormat,
        config: &EngineConfig,
        waveform: Arc<WaveformBuffer>,
        recording: RecordingSlot,
    ) -> Result<Self, CaptureError> {
        handle.initialize(&format, StreamMode::from(endpoint.kind), config.endpoint_buffer())?;

        let running = Arc::new(AtomicBool::new(true));
        let status = Arc::new(Mutex::new(CaptureStatus::Starting));
        let counters = Arc::new(CaptureCounters::default());
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();
        let (exit_tx, exit_rx) = mpsc::channel::<()>();

        let sinks = Sinks {
            waveform,
            recording,
            counters: Arc::clone(&counters),
        };
        let thread_running = Arc::clone(&running);
        let thread_status = Arc::clone(&status);
        let poll_interval = config.poll_interval();
        let label = endpoint.display_name.clone();

        let join = thread::Builder::new()
            .name("capture-poll".into())
            .spawn(move || {
                let _exit = exit_tx;
                run(handle, format, poll_interval, thread_running, thread_status, ready_tx, sinks);
                log::debug!("capture thread for {} exited", label);
            })
            .map_err(|e| CaptureError::InitError(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(config.start_timeout()) {
            Ok(Ok(())) => {
                log::info!("capturing from {} ({})", endpoint.display_name, format);
                Ok(Self {
                    endpoint: endpoint.clone(),
                    format,
                    running,
                    status,
                    counters,
                    handle: Some(join),
                    exited: Some(exit_rx),
                    stop_timeout: config.stop_timeout(),
                })
            }
            Ok(Err(e)) => {
                running.store(false, Ordering::SeqCst);
                let _ = join.join();
                log::error!("capture on {} failed to start: {}", endpoint.display_name, e);
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) => {
                running.store(false, Ordering::SeqCst);
                log::error!(
                    "capture thread for {} did not start within {:?}; detaching it",
                    endpoint.display_name,
                    config.start_timeout()
                );
                Err(CaptureError::InitError("capture thread did not start in time".into()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = join.join();
                Err(CaptureError::InitError("capture thread exited during startup".into()))
            }
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub fn status(&self) -> CaptureStatus {
        *self.status.lock()
    }

    pub fn diagnostics(&self) -> CaptureDiagnostics {
        self.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> Arc<CaptureCounters> {
        Arc::clone(&self.counters)
    }

    /// Signal the poll thread to exit and join it within the stop timeout.
    ///
    /// Never blocks longer than the timeout: a thread that has not exited
    /// by then is detached and left to finish on its own. Returns whether
    /// the thread was joined.
    pub fn stop(&mut self) -> bool {
        let Some(join) = self.handle.take() else {
            return true;
        };
        *self.status.lock() = CaptureStatus::Stopping;
        self.running.store(false, Ordering::SeqCst);

        let exited = match self.exited.take() {
            Some(rx) => !matches!(rx.recv_timeout(self.stop_timeout), Err(RecvTimeoutError::Timeout)),
            None => true,
        };

        let joined = if exited {
            if join.join().is_err() {
                log::error!("capture thread for {} panicked", self.endpoint.display_name);
            }
            true
        } else {
            log::warn!(
                "capture thread for {} did not exit within {:?}; detaching it",
                self.endpoint.display_name,
                self.stop_timeout
            );
            false
        };

        *self.status.lock() = CaptureStatus::Idle;
        log::info!("capture from {} stopped", self.endpoint.display_name);
        joined
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Mono scratch frames for two poll intervals, capped at one second.
fn scratch_capacity(format: &CaptureFormat, poll_interval: Duration) -> usize {
    let poll_millis = u64::try_from(poll_interval.as_millis()).unwrap_or(u64::MAX);
    format
        .frames_for_millis(poll_millis.saturating_mul(2))
        .min(format.sample_rate_hz() as usize)
}

fn run(
    mut handle: Box<dyn AudioEndpoint>,
    format: CaptureFormat,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<CaptureStatus>>,
    ready: mpsc::Sender<Result<(), CaptureError>>,
    sinks: Sinks,
) {
    if let Err(e) = handle.attach_thread() {
        let _ = ready.send(Err(e));
        return;
    }
    if let Err(e) = handle.start() {
        handle.detach_thread();
        let _ = ready.send(Err(e));
        return;
    }
    *status.lock() = CaptureStatus::Running;
    if ready.send(Ok(())).is_err() {
        // The starter gave up waiting; it has already cleared `running`.
        log::debug!("capture start was abandoned by the caller");
    }

    let mut scratch = Vec::with_capacity(scratch_capacity(&format, poll_interval));
    let mut failing = false;

    while running.load(Ordering::SeqCst) {
        thread::sleep(poll_interval);

        match drain(handle.as_mut(), format, &sinks, &mut scratch) {
            Ok(()) => {
                if failing {
                    log::info!("capture polling recovered");
                    failing = false;
                }
            }
            Err(e) => {
                sinks.counters.transient_error();
                if failing {
                    log::debug!("capture poll failed again: {}", e);
                } else {
                    log::warn!("capture poll failed: {}", e);
                    failing = true;
                }
            }
        }
    }

    if let Err(e) = handle.stop() {
        log::warn!("failed to stop endpoint stream: {}", e);
    }
    if let Err(e) = handle.reset() {
        log::debug!("failed to reset endpoint stream: {}", e);
    }
    handle.detach_thread();
}

/// Drain every chunk currently queued on the endpoint.
///
/// An acquired chunk is always released, even if a later step of this
/// iteration fails.
fn drain(
    handle: &mut dyn AudioEndpoint,
    format: CaptureFormat,
    sinks: &Sinks,
    scratch: &mut Vec<f32>,
) -> Result<(), CaptureError> {
    while handle.pending_frames()? > 0 {
        let frames = {
            let chunk = handle.acquire_chunk()?;
            fan_out(&chunk, format, sinks, scratch);
            chunk.frame_count()
        };
        handle.release_chunk(frames)?;
    }
    Ok(())
}

fn fan_out(chunk: &Chunk<'_>, format: CaptureFormat, sinks: &Sinks, scratch: &mut Vec<f32>) {
    let frames = chunk.frame_count();
    if frames == 0 {
        return;
    }

    if chunk.is_silent() {
        sinks.waveform.push_silence(frames as usize);
    } else {
        scratch.clear();
        pcm::decode_mono_into(chunk.data(), format.channels(), frames as usize, scratch);
        sinks.waveform.push_samples(scratch);
    }

    if recorder::offer_chunk(&sinks.recording, chunk) {
        sinks.counters.recorded_chunk();
    }
    sinks.counters.chunk(frames, chunk.is_silent());
}
