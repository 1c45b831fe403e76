//! In-memory endpoint backend.
//!
//! Devices, default ids, formats and failures are scripted up front; audio
//! is queued through a [`SyntheticFeed`] and handed out by the same
//! acquire/release protocol a hardware endpoint uses. Every misuse of that
//! protocol is counted so tests can assert the capture loop never double
//! releases or leaks a chunk.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::chunk::Chunk;
use crate::models::endpoint::{DeviceDescriptor, Endpoint, EndpointKind};
use crate::models::error::CaptureError;
use crate::models::format::{CaptureFormat, MixFormat};
use crate::traits::endpoint::{AudioEndpoint, EndpointProvider, FormatSupport, StreamMode};

#[derive(Debug, Clone)]
struct QueuedChunk {
    data: Vec<u8>,
    frames: u32,
    silent: bool,
}

#[derive(Debug, Default)]
struct FeedState {
    queue: VecDeque<QueuedChunk>,
    poll_errors: u32,
    stall: Option<Duration>,
    initialized: Option<(CaptureFormat, StreamMode)>,
    running: bool,
    starts: u32,
    stops: u32,
    acquired: u64,
    released: u64,
    outstanding: bool,
    protocol_violations: u64,
    attached_threads: u32,
    detached_threads: u32,
}

/// Audio source and observation point for one synthetic device.
///
/// Clones share the same queue; push audio from the test thread while the
/// capture thread drains it.
#[derive(Debug, Clone, Default)]
pub struct SyntheticFeed {
    state: Arc<Mutex<FeedState>>,
}

impl SyntheticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk of interleaved 16-bit little-endian frames.
    pub fn push_chunk(&self, data: Vec<u8>, frames: u32) {
        self.state.lock().queue.push_back(QueuedChunk {
            data,
            frames,
            silent: false,
        });
    }

    /// Queue a chunk flagged silent, carrying no sample bytes.
    pub fn push_silent(&self, frames: u32) {
        self.state.lock().queue.push_back(QueuedChunk {
            data: Vec::new(),
            frames,
            silent: true,
        });
    }

    /// Make the next `count` polls fail with `TransientPoll`.
    pub fn inject_poll_errors(&self, count: u32) {
        self.state.lock().poll_errors += count;
    }

    /// Block every poll for `stall`, imitating a wedged driver.
    pub fn set_stall(&self, stall: Option<Duration>) {
        self.state.lock().stall = stall;
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Wait until every queued chunk has been acquired and released.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let state = self.state.lock();
                if state.queue.is_empty() && !state.outstanding {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn initialized_with(&self) -> Option<(CaptureFormat, StreamMode)> {
        self.state.lock().initialized
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn start_count(&self) -> u32 {
        self.state.lock().starts
    }

    pub fn stop_count(&self) -> u32 {
        self.state.lock().stops
    }

    pub fn acquired(&self) -> u64 {
        self.state.lock().acquired
    }

    pub fn released(&self) -> u64 {
        self.state.lock().released
    }

    /// Double acquires, releases without an acquire, and releases with the
    /// wrong frame count.
    pub fn protocol_violations(&self) -> u64 {
        self.state.lock().protocol_violations
    }

    /// (attached, detached) poll-thread counts.
    pub fn thread_attachments(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.attached_threads, state.detached_threads)
    }
}

/// A scripted device.
#[derive(Debug, Clone)]
pub struct SyntheticDevice {
    pub descriptor: DeviceDescriptor,
    pub mix_format: MixFormat,
    pub format_support: FormatSupport,
    pub fail_open: bool,
    pub fail_initialize: bool,
    pub fail_start: bool,
    pub feed: SyntheticFeed,
}

impl SyntheticDevice {
    /// An active 48 kHz stereo float device that accepts 16-bit PCM.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::from_descriptor(DeviceDescriptor::new(id, name))
    }

    pub fn from_descriptor(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            mix_format: MixFormat::float32(2, 48000),
            format_support: FormatSupport::Supported,
            fail_open: false,
            fail_initialize: false,
            fail_start: false,
            feed: SyntheticFeed::new(),
        }
    }

    pub fn with_mix_format(mut self, mix_format: MixFormat) -> Self {
        self.mix_format = mix_format;
        self
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    devices: Vec<(EndpointKind, SyntheticDevice)>,
    defaults: HashMap<EndpointKind, String>,
    fail_enumeration: bool,
    fail_default_lookup: bool,
    open_delay: Option<Duration>,
    opened: u32,
}

/// Scripted [`EndpointProvider`]. Clones share the same device table.
#[derive(Debug, Clone, Default)]
pub struct SyntheticProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device and return its feed.
    pub fn add_device(&self, kind: EndpointKind, device: SyntheticDevice) -> SyntheticFeed {
        let feed = device.feed.clone();
        self.state.lock().devices.push((kind, device));
        feed
    }

    /// Remove every device with `id`, as if it were unplugged.
    pub fn remove_device(&self, id: &str) {
        self.state.lock().devices.retain(|(_, d)| d.descriptor.id != id);
    }

    pub fn set_default(&self, kind: EndpointKind, id: Option<&str>) {
        let mut state = self.state.lock();
        match id {
            Some(id) => state.defaults.insert(kind, id.to_string()),
            None => state.defaults.remove(&kind),
        };
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.state.lock().fail_enumeration = fail;
    }

    pub fn fail_default_lookup(&self, fail: bool) {
        self.state.lock().fail_default_lookup = fail;
    }

    /// Delay every `open` by `delay`, imitating a slow device activation.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        self.state.lock().open_delay = delay;
    }

    /// Number of successful `open` calls.
    pub fn open_count(&self) -> u32 {
        self.state.lock().opened
    }
}

impl EndpointProvider for SyntheticProvider {
    fn enumerate(&self, kind: EndpointKind) -> Result<Vec<DeviceDescriptor>, CaptureError> {
        let state = self.state.lock();
        if state.fail_enumeration {
            return Err(CaptureError::InitError("synthetic enumeration failure".into()));
        }
        Ok(state
            .devices
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, d)| d.descriptor.clone())
            .collect())
    }

    fn default_device_id(&self, kind: EndpointKind) -> Result<Option<String>, CaptureError> {
        let state = self.state.lock();
        if state.fail_default_lookup {
            return Err(CaptureError::InitError("synthetic default lookup failure".into()));
        }
        Ok(state.defaults.get(&kind).cloned())
    }

    fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn AudioEndpoint>, CaptureError> {
        let delay = self.state.lock().open_delay;
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut state = self.state.lock();
        let device = state
            .devices
            .iter()
            .find(|(k, d)| *k == endpoint.kind && d.descriptor.id == endpoint.id)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| CaptureError::InitError(format!("device {} is no longer present", endpoint.id)))?;
        if device.fail_open {
            return Err(CaptureError::InitError(format!("device {} refused to open", endpoint.id)));
        }
        state.opened += 1;
        Ok(Box::new(SyntheticEndpoint::new(device)))
    }
}

/// An opened synthetic device.
pub struct SyntheticEndpoint {
    device: SyntheticDevice,
    held: Option<QueuedChunk>,
}

impl SyntheticEndpoint {
    fn new(device: SyntheticDevice) -> Self {
        Self { device, held: None }
    }

    fn feed(&self) -> parking_lot::MutexGuard<'_, FeedState> {
        self.device.feed.state.lock()
    }
}

impl AudioEndpoint for SyntheticEndpoint {
    fn mix_format(&mut self) -> Result<MixFormat, CaptureError> {
        Ok(self.device.mix_format)
    }

    fn check_format(&mut self, _format: &CaptureFormat) -> Result<FormatSupport, CaptureError> {
        Ok(self.device.format_support)
    }

    fn initialize(
        &mut self,
        format: &CaptureFormat,
        mode: StreamMode,
        _buffer_duration: Duration,
    ) -> Result<(), CaptureError> {
        if self.device.fail_initialize {
            return Err(CaptureError::InitError("synthetic initialize failure".into()));
        }
        self.feed().initialized = Some((*format, mode));
        Ok(())
    }

    fn attach_thread(&mut self) -> Result<(), CaptureError> {
        self.feed().attached_threads += 1;
        Ok(())
    }

    fn detach_thread(&mut self) {
        self.feed().detached_threads += 1;
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if self.device.fail_start {
            return Err(CaptureError::InitError("synthetic start failure".into()));
        }
        let mut feed = self.feed();
        if feed.initialized.is_none() {
            return Err(CaptureError::InitError("stream started before initialize".into()));
        }
        feed.running = true;
        feed.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        let mut feed = self.feed();
        feed.running = false;
        feed.stops += 1;
        Ok(())
    }

    fn pending_frames(&mut self) -> Result<u32, CaptureError> {
        let stall = self.feed().stall;
        if let Some(stall) = stall {
            thread::sleep(stall);
        }
        let mut feed = self.feed();
        if feed.poll_errors > 0 {
            feed.poll_errors -= 1;
            return Err(CaptureError::TransientPoll("synthetic poll failure".into()));
        }
        Ok(feed.queue.front().map_or(0, |c| c.frames))
    }

    fn acquire_chunk(&mut self) -> Result<Chunk<'_>, CaptureError> {
        let next = {
            let mut feed = self.feed();
            if self.held.is_some() {
                feed.protocol_violations += 1;
                return Err(CaptureError::TransientPoll("previous chunk not released".into()));
            }
            let next = feed
                .queue
                .pop_front()
                .ok_or_else(|| CaptureError::TransientPoll("no chunk queued".into()))?;
            feed.acquired += 1;
            feed.outstanding = true;
            next
        };

        let held = self.held.insert(next);
        Ok(if held.silent {
            Chunk::silent(held.frames)
        } else {
            Chunk::audio(&held.data, held.frames)
        })
    }

    fn release_chunk(&mut self, frame_count: u32) -> Result<(), CaptureError> {
        let held = self.held.take();
        let mut feed = self.feed();
        match held {
            Some(chunk) if chunk.frames == frame_count => {
                feed.released += 1;
                feed.outstanding = false;
                Ok(())
            }
            Some(chunk) => {
                feed.protocol_violations += 1;
                feed.outstanding = false;
                Err(CaptureError::TransientPoll(format!(
                    "released {} frames of a {}-frame chunk",
                    frame_count, chunk.frames
                )))
            }
            None => {
                feed.protocol_violations += 1;
                Err(CaptureError::TransientPoll("release without acquire".into()))
            }
        }
    }
}
