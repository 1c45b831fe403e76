use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::ControllerState;

/// Event observer for session controller notifications.
///
/// Never called while the controller holds its own lock, so implementations
/// may call back into the controller. `on_error` can also fire from the
/// recording writer thread; marshal to a UI thread if needed.
pub trait SessionObserver: Send + Sync {
    fn on_state_changed(&self, _state: &ControllerState) {}

    fn on_error(&self, _error: &CaptureError) {}

    fn on_recording_finished(&self, _result: &RecordingResult) {}
}
