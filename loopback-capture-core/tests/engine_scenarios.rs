use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use parking_lot::Mutex;

use loopback_capture_core::processing::{pcm, wav_format};
use loopback_capture_core::storage::metadata;
use loopback_capture_core::{
    CaptureError, ControllerState, EndpointKind, EngineConfig, RecordingResult, SessionController, SessionObserver,
    SyntheticDevice, SyntheticFeed, SyntheticProvider,
};

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("loopback_capture_it_{}", uuid::Uuid::new_v4()))
}

fn config(output_directory: PathBuf) -> EngineConfig {
    EngineConfig {
        poll_interval_ms: 1,
        output_directory,
        ..Default::default()
    }
}

fn speakers() -> (SyntheticProvider, SyntheticFeed) {
    let provider = SyntheticProvider::new();
    let feed = provider.add_device(EndpointKind::PlaybackLoopback, SyntheticDevice::new("spk", "Speakers"));
    provider.set_default(EndpointKind::PlaybackLoopback, Some("spk"));
    (provider, feed)
}

fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !done() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

#[derive(Default)]
struct RecordingObserver {
    states: Mutex<Vec<ControllerState>>,
    errors: Mutex<Vec<CaptureError>>,
    finished: Mutex<Vec<RecordingResult>>,
}

impl SessionObserver for RecordingObserver {
    fn on_state_changed(&self, state: &ControllerState) {
        self.states.lock().push(*state);
    }

    fn on_error(&self, error: &CaptureError) {
        self.errors.lock().push(error.clone());
    }

    fn on_recording_finished(&self, result: &RecordingResult) {
        self.finished.lock().push(result.clone());
    }
}

#[test]
fn no_playback_endpoints_lists_nothing() {
    let controller = SessionController::new(Arc::new(SyntheticProvider::new()), EngineConfig::default()).unwrap();
    let endpoints = controller.list_devices(EndpointKind::PlaybackLoopback);
    assert!(endpoints.is_empty());
    assert!(!endpoints.iter().any(|e| e.is_system_default));
    assert!(controller.current_device().is_none());
}

#[test]
fn one_second_of_half_scale_stereo() {
    let (provider, feed) = speakers();
    let controller = SessionController::new(Arc::new(provider), config(temp_dir())).unwrap();
    controller.select_default_device(EndpointKind::PlaybackLoopback).unwrap();
    let format = controller.current_format().unwrap();
    assert_eq!((format.sample_rate_hz(), format.channels()), (48000, 2));

    controller.start_capture().unwrap();
    for _ in 0..100 {
        feed.push_chunk(pcm::constant_frames(16384, 2, 480), 480);
    }

    assert!(wait_for(Duration::from_secs(5), || controller.sample_count() == 48000));
    assert_relative_eq!(controller.current_level(), 0.5, epsilon = 1e-4);
    let snapshot = controller.waveform_snapshot(48000);
    assert_eq!(snapshot.len(), 48000);
    assert!(snapshot.iter().all(|&s| (s - 0.5).abs() < 1e-6));

    let diagnostics = controller.diagnostics();
    assert_eq!(diagnostics.chunks, 100);
    assert_eq!(diagnostics.frames, 48000);
    controller.stop_capture().unwrap();
    assert_eq!(feed.acquired(), feed.released());
    assert_eq!(feed.protocol_violations(), 0);
}

#[test]
fn recording_before_capture_is_rejected_without_a_state_change() {
    let (provider, _) = speakers();
    let dir = temp_dir();
    let controller = SessionController::new(Arc::new(provider), config(dir.clone())).unwrap();
    controller.select_default_device(EndpointKind::PlaybackLoopback).unwrap();

    let path = dir.join("early.wav");
    let result = controller.start_recording(&path);
    assert!(matches!(result, Err(CaptureError::InvalidState(_))));
    assert_eq!(controller.state(), ControllerState::Ready);
    assert!(!path.exists());
}

#[test]
fn switching_while_capturing_is_rejected_without_a_state_change() {
    let (provider, _) = speakers();
    provider.add_device(EndpointKind::PlaybackLoopback, SyntheticDevice::new("hp", "Headphones"));
    let controller = SessionController::new(Arc::new(provider), config(temp_dir())).unwrap();
    controller.select_default_device(EndpointKind::PlaybackLoopback).unwrap();
    controller.start_capture().unwrap();

    let result = controller.select_device(1, EndpointKind::PlaybackLoopback);
    assert!(matches!(result, Err(CaptureError::InvalidState(_))));
    assert_eq!(controller.state(), ControllerState::Capturing);
    assert_eq!(controller.current_device().unwrap().id, "spk");

    controller.stop_capture().unwrap();
    let switched = controller.select_device(1, EndpointKind::PlaybackLoopback).unwrap();
    assert_eq!(switched.display_name, "Headphones");
}

#[test]
fn stopping_capture_finalizes_an_active_recording() {
    let (provider, feed) = speakers();
    let dir = temp_dir();
    let controller = SessionController::new(
        Arc::new(provider),
        EngineConfig {
            write_metadata_sidecar: true,
            ..config(dir.clone())
        },
    )
    .unwrap();
    let observer = Arc::new(RecordingObserver::default());
    controller.set_observer(Some(observer.clone()));

    controller.select_default_device(EndpointKind::PlaybackLoopback).unwrap();
    controller.start_capture().unwrap();
    let path = controller.start_recording(dir.join("take.wav")).unwrap();
    assert_eq!(controller.state(), ControllerState::Recording);
    assert!(controller.session_state().recording);

    feed.push_chunk(pcm::constant_frames(1000, 2, 480), 480);
    feed.push_silent(480);
    assert!(feed.wait_drained(Duration::from_secs(2)));

    let result = controller.stop_capture().unwrap().expect("recording result");
    assert_eq!(controller.state(), ControllerState::Ready);
    assert_eq!(result.frames, 960);
    assert_eq!(result.data_bytes, 960 * 4);
    assert_relative_eq!(result.duration_secs, 0.02);

    let bytes = fs::read(&path).unwrap();
    let header = wav_format::parse_wav_header(&bytes).unwrap();
    assert_eq!(header.data_size as usize, 960 * 4);
    assert_eq!(header.riff_size as usize, bytes.len() - 8);
    assert!(bytes[44 + 480 * 4..].iter().all(|&b| b == 0));

    let sidecar = metadata::read_metadata(&path).unwrap();
    assert_eq!(sidecar.checksum, result.checksum);

    assert_eq!(
        *observer.states.lock(),
        vec![
            ControllerState::SwitchingDevice,
            ControllerState::Ready,
            ControllerState::Capturing,
            ControllerState::Recording,
            ControllerState::Ready,
        ]
    );
    assert_eq!(observer.finished.lock().len(), 1);
    assert!(observer.errors.lock().is_empty());

    fs::remove_dir_all(&dir).ok();
}

#[test]
fn unwritable_recording_path_keeps_capturing() {
    let (provider, _) = speakers();
    let dir = temp_dir();
    fs::create_dir_all(&dir).unwrap();
    let blocker = dir.join("not_a_dir");
    fs::write(&blocker, b"x").unwrap();

    let controller = SessionController::new(Arc::new(provider), config(dir.clone())).unwrap();
    controller.select_default_device(EndpointKind::PlaybackLoopback).unwrap();
    controller.start_capture().unwrap();

    let result = controller.start_recording(blocker.join("take.wav"));
    assert!(matches!(result, Err(CaptureError::IoError(_))));
    assert_eq!(controller.state(), ControllerState::Capturing);

    controller.stop_capture().unwrap();
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn enumeration_failure_is_reported_to_the_observer() {
    let (provider, _) = speakers();
    provider.fail_enumeration(true);
    let controller = SessionController::new(Arc::new(provider), EngineConfig::default()).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    controller.set_observer(Some(observer.clone()));

    assert!(controller.list_devices(EndpointKind::PlaybackLoopback).is_empty());
    assert!(matches!(observer.errors.lock()[0], CaptureError::InitError(_)));
}

#[cfg(unix)]
#[test]
fn write_failure_aborts_the_recording_and_capture_continues() {
    let (provider, feed) = speakers();
    let controller = SessionController::new(Arc::new(provider), config(temp_dir())).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    controller.set_observer(Some(observer.clone()));

    controller.select_default_device(EndpointKind::PlaybackLoopback).unwrap();
    controller.start_capture().unwrap();
    controller.start_recording("/dev/full").unwrap();
    assert_eq!(controller.state(), ControllerState::Recording);

    for _ in 0..20 {
        feed.push_chunk(pcm::constant_frames(1000, 2, 4800), 4800);
    }
    assert!(wait_for(Duration::from_secs(5), || controller.state() == ControllerState::Capturing));
    assert!(observer.errors.lock().iter().any(|e| matches!(e, CaptureError::IoError(_))));

    let before = controller.sample_count();
    feed.push_chunk(pcm::constant_frames(1000, 2, 480), 480);
    assert!(wait_for(Duration::from_secs(5), || controller.sample_count() >= before + 480));

    assert!(matches!(controller.stop_recording(), Err(CaptureError::InvalidState(_))));
    assert!(controller.stop_capture().unwrap().is_none());
    assert_eq!(controller.state(), ControllerState::Ready);
    assert_eq!(feed.acquired(), feed.released());
}
