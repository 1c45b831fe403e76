//! Session controller: the single owner of all mutable engine state.
//!
//! ```text
//!            select_device (ok or failed)
//!        +-----------------------------------+
//!        v                                   |
//!     Ready ---select_device---> SwitchingDevice
//!      |  ^
//!  start_capture / stop_capture
//!      v  |
//!    Capturing --start_recording--> Recording
//!            <--stop_recording-----
//! ```
//!
//! Control operations are serialized by one lock. Level, snapshot and
//! sample-count reads go straight to the waveform buffer, and state reads
//! go to a published copy, so neither waits on a control operation in
//! progress. Observer callbacks run after the lock is released.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::models::config::EngineConfig;
use crate::models::diagnostics::{CaptureCounters, CaptureDiagnostics};
use crate::models::endpoint::{Endpoint, EndpointKind};
use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::models::recording_result::RecordingResult;
use crate::models::state::{ControllerState, SessionState};
use crate::processing::ring_buffer::WaveformBuffer;
use crate::session::capture::CaptureSession;
use crate::session::directory::EndpointDirectory;
use crate::session::negotiator;
use crate::storage::recorder::{Recorder, RecordingSlot};
use crate::traits::endpoint::{AudioEndpoint, EndpointProvider};
use crate::traits::observer::SessionObserver;

/// Sample rate assumed for the level window before any device is selected.
const DEFAULT_LEVEL_RATE_HZ: u32 = 48000;

#[derive(Debug, Clone)]
struct ActiveDevice {
    endpoint: Endpoint,
    format: CaptureFormat,
}

enum Event {
    State(ControllerState),
    Error(CaptureError),
    RecordingFinished(RecordingResult),
}

struct ControlState {
    state: ControllerState,
    active: Option<ActiveDevice>,
    /// Endpoint opened during negotiation, handed to the next capture.
    prepared: Option<Box<dyn AudioEndpoint>>,
    session: Option<CaptureSession>,
    recorder: Option<Recorder>,
    listings: HashMap<EndpointKind, Vec<Endpoint>>,
    next_recording: u32,
    events: Vec<Event>,
}

impl ControlState {
    fn transition(&mut self, state: ControllerState) {
        if self.state != state {
            log::debug!("controller {:?} -> {:?}", self.state, state);
            self.state = state;
            self.events.push(Event::State(state));
        }
    }

    /// Collect a recording whose writer stopped on its own after a write
    /// failure. Capture keeps running.
    fn reap_recorder(&mut self) {
        if !self.state.is_recording() || !self.recorder.as_ref().is_some_and(Recorder::is_finished) {
            return;
        }
        if let Some(recorder) = self.recorder.take() {
            match recorder.finish() {
                Ok(result) => self.events.push(Event::RecordingFinished(result)),
                Err(e) => log::warn!("recording ended early: {}", e),
            }
        }
        self.transition(ControllerState::Capturing);
    }
}

struct Published {
    state: ControllerState,
    active: Option<ActiveDevice>,
    counters: Option<Arc<CaptureCounters>>,
}

/// Owns the device selection, capture session and recording for one engine.
pub struct SessionController {
    provider: Arc<dyn EndpointProvider>,
    directory: EndpointDirectory,
    config: EngineConfig,
    waveform: Arc<WaveformBuffer>,
    recording: RecordingSlot,
    control: Mutex<ControlState>,
    published: RwLock<Published>,
    observer: RwLock<Option<Arc<dyn SessionObserver>>>,
}

impl SessionController {
    pub fn new(provider: Arc<dyn EndpointProvider>, config: EngineConfig) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;

        Ok(Self {
            directory: EndpointDirectory::new(Arc::clone(&provider)),
            provider,
            waveform: Arc::new(WaveformBuffer::new(config.waveform_capacity)),
            recording: RecordingSlot::default(),
            control: Mutex::new(ControlState {
                state: ControllerState::Ready,
                active: None,
                prepared: None,
                session: None,
                recorder: None,
                listings: HashMap::new(),
                next_recording: 1,
                events: Vec::new(),
            }),
            published: RwLock::new(Published {
                state: ControllerState::Ready,
                active: None,
                counters: None,
            }),
            observer: RwLock::new(None),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn SessionObserver>>) {
        *self.observer.write() = observer;
    }

    /// Enumerate endpoints of `kind` and remember the listing for
    /// [`select_device`](Self::select_device).
    ///
    /// Enumeration failure yields an empty listing; the error goes to the
    /// observer.
    pub fn list_devices(&self, kind: EndpointKind) -> Vec<Endpoint> {
        let (endpoints, error) = self.directory.list(kind);

        let mut control = self.control.lock();
        control.listings.insert(kind, endpoints.clone());
        if let Some(e) = error {
            control.events.push(Event::Error(e));
        }
        self.finish_op(control);
        endpoints
    }

    /// Switch to the endpoint at `ordinal` in the last listing of `kind`,
    /// negotiating its capture format.
    ///
    /// Only allowed from `Ready`. On failure the controller is left `Ready`
    /// with no active endpoint and cleared listings.
    pub fn select_device(&self, ordinal: usize, kind: EndpointKind) -> Result<Endpoint, CaptureError> {
        let endpoint = {
            let mut control = self.control.lock();
            control.reap_recorder();

            let rejection = match control.state {
                ControllerState::Ready => None,
                ControllerState::SwitchingDevice => {
                    Some(CaptureError::DeviceSwitchFailed("another device switch is in progress".into()))
                }
                ControllerState::Capturing | ControllerState::Recording => Some(CaptureError::InvalidState(
                    "stop capture before switching devices".into(),
                )),
            };
            if let Some(e) = rejection {
                self.finish_op(control);
                return Err(e);
            }

            let Some(endpoint) = control
                .listings
                .get(&kind)
                .and_then(|listing| listing.iter().find(|e| e.ordinal == ordinal))
                .cloned()
            else {
                self.finish_op(control);
                return Err(CaptureError::DeviceSwitchFailed(format!(
                    "no {} device with ordinal {} in the last listing",
                    kind, ordinal
                )));
            };

            control.prepared = None;
            control.active = None;
            control.transition(ControllerState::SwitchingDevice);
            self.finish_op(control);
            endpoint
        };

        log::info!("switching to {} ({})", endpoint.display_name, kind);
        let outcome = prepare(self.provider.as_ref(), &endpoint);

        let mut control = self.control.lock();
        let result = match outcome {
            Ok((handle, format)) => {
                control.active = Some(ActiveDevice {
                    endpoint: endpoint.clone(),
                    format,
                });
                control.prepared = Some(handle);
                Ok(endpoint)
            }
            Err(e) => {
                control.listings.clear();
                let error = CaptureError::DeviceSwitchFailed(format!("{}: {}", endpoint.display_name, e));
                log::error!("{}", error);
                control.events.push(Event::Error(error.clone()));
                Err(error)
            }
        };
        control.transition(ControllerState::Ready);
        self.finish_op(control);
        result
    }

    /// Select the endpoint currently marked as the system default for
    /// `kind`, refreshing the listing first.
    pub fn select_default_device(&self, kind: EndpointKind) -> Result<Endpoint, CaptureError> {
        let default = self
            .list_devices(kind)
            .into_iter()
            .find(|e| e.is_system_default)
            .ok_or_else(|| CaptureError::DeviceSwitchFailed(format!("no default {} device", kind)))?;
        self.select_device(default.ordinal, kind)
    }

    /// Start streaming from the selected endpoint. `Ready -> Capturing`.
    pub fn start_capture(&self) -> Result<(), CaptureError> {
        let mut control = self.control.lock();
        let result = self.start_capture_locked(&mut control);
        self.finish_op(control);
        result
    }

    fn start_capture_locked(&self, control: &mut ControlState) -> Result<(), CaptureError> {
        match control.state {
            ControllerState::Ready => {}
            ControllerState::SwitchingDevice => {
                return Err(CaptureError::InvalidState("a device switch is in progress".into()))
            }
            ControllerState::Capturing | ControllerState::Recording => {
                return Err(CaptureError::InvalidState("capture is already running".into()))
            }
        }
        let active = control
            .active
            .clone()
            .ok_or_else(|| CaptureError::InvalidState("no device selected".into()))?;

        let handle = match control.prepared.take() {
            Some(handle) => handle,
            None => self.provider.open(&active.endpoint)?,
        };
        let session = CaptureSession::start(
            handle,
            &active.endpoint,
            active.format,
            &self.config,
            Arc::clone(&self.waveform),
            Arc::clone(&self.recording),
        )?;

        control.session = Some(session);
        control.transition(ControllerState::Capturing);
        Ok(())
    }

    /// Stop streaming. `Capturing -> Ready`.
    ///
    /// An active recording is finalized first and its result returned.
    /// Capture is torn down even if finalizing the recording fails; that
    /// error is then returned.
    pub fn stop_capture(&self) -> Result<Option<RecordingResult>, CaptureError> {
        let mut control = self.control.lock();
        let result = Self::stop_capture_locked(&mut control);
        self.finish_op(control);
        result
    }

    fn stop_capture_locked(control: &mut ControlState) -> Result<Option<RecordingResult>, CaptureError> {
        if !control.state.is_capturing() {
            return Err(CaptureError::InvalidState("capture is not running".into()));
        }

        let recording = control.recorder.take().map(Recorder::finish).transpose();
        if let Ok(Some(ref result)) = recording {
            control.events.push(Event::RecordingFinished(result.clone()));
        }

        if let Some(mut session) = control.session.take() {
            session.stop();
        }
        control.transition(ControllerState::Ready);
        recording
    }

    /// Start recording the running capture stream to `path`.
    /// `Capturing -> Recording`.
    pub fn start_recording(&self, path: impl Into<PathBuf>) -> Result<PathBuf, CaptureError> {
        let mut control = self.control.lock();
        let result = self.start_recording_locked(&mut control, path.into());
        self.finish_op(control);
        result
    }

    /// Start recording to `recording_<n>.wav` in the configured output
    /// directory. `n` starts at 1 and advances only when a recording starts.
    pub fn start_numbered_recording(&self) -> Result<PathBuf, CaptureError> {
        let mut control = self.control.lock();
        let path = self
            .config
            .output_directory
            .join(format!("recording_{}.wav", control.next_recording));
        let result = self.start_recording_locked(&mut control, path);
        if result.is_ok() {
            control.next_recording += 1;
        }
        self.finish_op(control);
        result
    }

    fn start_recording_locked(&self, control: &mut ControlState, path: PathBuf) -> Result<PathBuf, CaptureError> {
        control.reap_recorder();
        match control.state {
            ControllerState::Capturing => {}
            ControllerState::Recording => return Err(CaptureError::InvalidState("already recording".into())),
            ControllerState::Ready | ControllerState::SwitchingDevice => {
                return Err(CaptureError::InvalidState("start capture before recording".into()))
            }
        }
        let (endpoint, format) = match control.session.as_ref() {
            Some(session) => (session.endpoint().clone(), session.format()),
            None => return Err(CaptureError::InvalidState("capture session missing".into())),
        };

        let recorder = Recorder::start(
            path.clone(),
            format,
            &endpoint,
            Arc::clone(&self.recording),
            self.config.writer_queue_depth,
            self.config.write_metadata_sidecar,
            self.observer.read().clone(),
        )?;

        control.recorder = Some(recorder);
        control.transition(ControllerState::Recording);
        Ok(path)
    }

    /// Finalize the active recording. `Recording -> Capturing`; capture
    /// keeps running whether or not finalizing succeeds.
    pub fn stop_recording(&self) -> Result<RecordingResult, CaptureError> {
        let mut control = self.control.lock();
        let result = Self::stop_recording_locked(&mut control);
        self.finish_op(control);
        result
    }

    fn stop_recording_locked(control: &mut ControlState) -> Result<RecordingResult, CaptureError> {
        if !control.state.is_recording() {
            return Err(CaptureError::InvalidState("not recording".into()));
        }
        let recorder = control
            .recorder
            .take()
            .ok_or_else(|| CaptureError::InvalidState("recorder missing".into()))?;
        control.transition(ControllerState::Capturing);

        let result = recorder.finish()?;
        control.events.push(Event::RecordingFinished(result.clone()));
        Ok(result)
    }

    /// RMS level over the configured window of the most recent samples,
    /// in [0, 1].
    pub fn current_level(&self) -> f32 {
        let rate = self
            .published
            .read()
            .active
            .as_ref()
            .map_or(DEFAULT_LEVEL_RATE_HZ, |a| a.format.sample_rate_hz());
        let window = (rate as u64 * self.config.level_window_ms / 1000).max(1) as usize;
        self.waveform.level_rms(window).clamp(0.0, 1.0)
    }

    /// Up to `max_samples` of the most recent mono samples, oldest first.
    pub fn waveform_snapshot(&self, max_samples: usize) -> Vec<f32> {
        self.waveform.snapshot(max_samples)
    }

    /// Mono samples pushed to the waveform buffer since creation.
    pub fn sample_count(&self) -> u64 {
        self.waveform.sample_count()
    }

    pub fn state(&self) -> ControllerState {
        self.refresh();
        self.published.read().state
    }

    pub fn current_device(&self) -> Option<Endpoint> {
        self.refresh();
        self.published.read().active.as_ref().map(|a| a.endpoint.clone())
    }

    pub fn current_format(&self) -> Option<CaptureFormat> {
        self.refresh();
        self.published.read().active.as_ref().map(|a| a.format)
    }

    pub fn session_state(&self) -> SessionState {
        self.refresh();
        let published = self.published.read();
        SessionState {
            capturing: published.state.is_capturing(),
            recording: published.state.is_recording(),
            active_endpoint: published.active.as_ref().map(|a| a.endpoint.clone()),
            active_format: published.active.as_ref().map(|a| a.format),
        }
    }

    /// Counters of the running capture session, or of the last one after
    /// it stopped.
    pub fn diagnostics(&self) -> CaptureDiagnostics {
        self.published
            .read()
            .counters
            .as_ref()
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Reap a recording that failed on its own, unless a control operation
    /// is already in flight.
    fn refresh(&self) {
        if let Some(mut control) = self.control.try_lock() {
            control.reap_recorder();
            self.finish_op(control);
        }
    }

    /// Publish the state, release the lock, then notify the observer.
    fn finish_op(&self, mut control: MutexGuard<'_, ControlState>) {
        {
            let mut published = self.published.write();
            published.state = control.state;
            published.active = control.active.clone();
            if let Some(session) = control.session.as_ref() {
                published.counters = Some(session.counters());
            }
        }
        let events = std::mem::take(&mut control.events);
        drop(control);

        if events.is_empty() {
            return;
        }
        let Some(observer) = self.observer.read().clone() else {
            return;
        };
        for event in events {
            match event {
                Event::State(state) => observer.on_state_changed(&state),
                Event::Error(e) => observer.on_error(&e),
                Event::RecordingFinished(result) => observer.on_recording_finished(&result),
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let control = self.control.get_mut();
        if let Some(recorder) = control.recorder.take() {
            if let Err(e) = recorder.finish() {
                log::error!("failed to finalize recording on shutdown: {}", e);
            }
        }
        if let Some(mut session) = control.session.take() {
            session.stop();
        }
    }
}

fn prepare(
    provider: &dyn EndpointProvider,
    endpoint: &Endpoint,
) -> Result<(Box<dyn AudioEndpoint>, CaptureFormat), CaptureError> {
    let mut handle = provider.open(endpoint)?;
    let format = negotiator::negotiate(handle.as_mut())?;
    Ok((handle, format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::synthetic::{SyntheticDevice, SyntheticFeed, SyntheticProvider};
    use crate::traits::endpoint::FormatSupport;
    use std::time::{Duration, Instant};

    fn controller_with(device: SyntheticDevice) -> (SessionController, SyntheticProvider, SyntheticFeed) {
        let provider = SyntheticProvider::new();
        let feed = provider.add_device(EndpointKind::PlaybackLoopback, device);
        provider.set_default(EndpointKind::PlaybackLoopback, Some("spk"));
        let config = EngineConfig {
            poll_interval_ms: 1,
            output_directory: std::env::temp_dir().join(format!("loopback_capture_test_{}", uuid::Uuid::new_v4())),
            ..Default::default()
        };
        let controller = SessionController::new(Arc::new(provider.clone()), config).unwrap();
        (controller, provider, feed)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            writer_queue_depth: 0,
            ..Default::default()
        };
        let result = SessionController::new(Arc::new(SyntheticProvider::new()), config);
        assert!(matches!(result, Err(CaptureError::ConfigurationFailed(_))));
    }

    #[test]
    fn selection_negotiates_and_reuses_the_opened_endpoint() {
        let (controller, provider, feed) = controller_with(SyntheticDevice::new("spk", "Speakers"));
        let selected = controller.select_default_device(EndpointKind::PlaybackLoopback).unwrap();
        assert_eq!(selected.id, "spk");
        assert_eq!(controller.current_format(), CaptureFormat::pcm16(2, 48000).ok());

        controller.start_capture().unwrap();
        assert_eq!(provider.open_count(), 1);
        assert_eq!(feed.start_count(), 1);

        controller.stop_capture().unwrap();
        controller.start_capture().unwrap();
        assert_eq!(provider.open_count(), 2);
        controller.stop_capture().unwrap();
    }

    #[test]
    fn unknown_ordinal_changes_nothing() {
        let (controller, _, _) = controller_with(SyntheticDevice::new("spk", "Speakers"));
        controller.list_devices(EndpointKind::PlaybackLoopback);
        controller.select_device(0, EndpointKind::PlaybackLoopback).unwrap();

        let result = controller.select_device(7, EndpointKind::PlaybackLoopback);
        assert!(matches!(result, Err(CaptureError::DeviceSwitchFailed(_))));
        assert_eq!(controller.state(), ControllerState::Ready);
        assert_eq!(controller.current_device().map(|e| e.id), Some("spk".to_string()));
    }

    #[test]
    fn failed_switch_leaves_no_active_endpoint() {
        let mut device = SyntheticDevice::new("spk", "Speakers");
        device.format_support = FormatSupport::Unsupported;
        let (controller, _, _) = controller_with(device);
        controller.list_devices(EndpointKind::PlaybackLoopback);

        let result = controller.select_device(0, EndpointKind::PlaybackLoopback);
        assert!(matches!(result, Err(CaptureError::DeviceSwitchFailed(_))));
        assert_eq!(controller.state(), ControllerState::Ready);
        assert!(controller.current_device().is_none());
        assert!(matches!(controller.start_capture(), Err(CaptureError::InvalidState(_))));

        // Listings are dropped with the failed switch.
        let retry = controller.select_device(0, EndpointKind::PlaybackLoopback);
        assert!(matches!(retry, Err(CaptureError::DeviceSwitchFailed(_))));
    }

    #[test]
    fn concurrent_switch_is_rejected_without_disturbing_the_first() {
        let (controller, provider, _) = controller_with(SyntheticDevice::new("spk", "Speakers"));
        provider.add_device(EndpointKind::PlaybackLoopback, SyntheticDevice::new("hp", "Headphones"));
        controller.list_devices(EndpointKind::PlaybackLoopback);
        provider.set_open_delay(Some(Duration::from_millis(300)));

        std::thread::scope(|scope| {
            let first = scope.spawn(|| controller.select_device(0, EndpointKind::PlaybackLoopback));

            let deadline = Instant::now() + Duration::from_secs(5);
            while controller.state() != ControllerState::SwitchingDevice {
                assert!(Instant::now() < deadline, "first switch never started");
                std::thread::sleep(Duration::from_millis(1));
            }
            let second = controller.select_device(1, EndpointKind::PlaybackLoopback);
            assert!(matches!(second, Err(CaptureError::DeviceSwitchFailed(_))));

            let selected = first.join().unwrap().unwrap();
            assert_eq!(selected.id, "spk");
        });

        assert_eq!(controller.state(), ControllerState::Ready);
        assert_eq!(controller.current_device().map(|e| e.id), Some("spk".to_string()));
        assert_eq!(provider.open_count(), 1);
    }

    #[test]
    fn failed_start_keeps_ready_and_retries_with_a_fresh_handle() {
        let mut device = SyntheticDevice::new("spk", "Speakers");
        device.fail_start = true;
        let (controller, provider, feed) = controller_with(device);
        controller.select_default_device(EndpointKind::PlaybackLoopback).unwrap();

        assert!(controller.start_capture().is_err());
        assert_eq!(controller.state(), ControllerState::Ready);
        assert!(controller.start_capture().is_err());
        assert_eq!(provider.open_count(), 2);
        assert_eq!(feed.thread_attachments(), (2, 2));
    }

    #[test]
    fn numbered_recordings_count_from_one() {
        let (controller, _, feed) = controller_with(SyntheticDevice::new("spk", "Speakers"));
        controller.select_default_device(EndpointKind::PlaybackLoopback).unwrap();
        controller.start_capture().unwrap();

        let first = controller.start_numbered_recording().unwrap();
        assert!(first.ends_with("recording_1.wav"));
        feed.push_silent(480);
        assert!(feed.wait_drained(std::time::Duration::from_secs(2)));
        let result = controller.stop_recording().unwrap();
        assert_eq!(result.frames, 480);

        let second = controller.start_numbered_recording().unwrap();
        assert!(second.ends_with("recording_2.wav"));
        let finished = controller.stop_capture().unwrap();
        assert!(finished.is_some());
        assert_eq!(controller.state(), ControllerState::Ready);

        std::fs::remove_dir_all(&controller.config().output_directory).ok();
    }

    #[test]
    fn level_uses_the_active_sample_rate() {
        let device = SyntheticDevice::new("spk", "Speakers")
            .with_mix_format(crate::models::format::MixFormat::float32(1, 1000));
        let (controller, _, feed) = controller_with(device);
        controller.select_default_device(EndpointKind::PlaybackLoopback).unwrap();
        controller.start_capture().unwrap();

        // 20 ms at 1 kHz is 20 samples: loud tail after a quiet head.
        feed.push_silent(100);
        feed.push_chunk(crate::processing::pcm::constant_frames(-8192, 1, 20), 20);
        assert!(feed.wait_drained(std::time::Duration::from_secs(2)));
        approx::assert_relative_eq!(controller.current_level(), 0.25);
        controller.stop_capture().unwrap();
    }
}
