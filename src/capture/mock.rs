//! Scriptable capture backend and default-input selector for tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::capture::{AudioCallback, CaptureBackend, CaptureHandle, DefaultInputSelector};
use crate::error::CaptureError;
use crate::priority::ResolvedSelection;

#[derive(Default)]
struct MockBackendState {
    callback: Option<AudioCallback>,
    started: Vec<String>,
    stopped: Vec<String>,
    fail_uids: Vec<String>,
}

/// Capture backend that lets tests feed samples by hand.
///
/// `start_capture` stores the engine callback; [`MockCaptureBackend::feed`]
/// invokes it as if the hardware had delivered a buffer. Dropping the handle
/// clears the callback, mirroring a real stream stop.
#[derive(Clone, Default)]
pub struct MockCaptureBackend {
    state: Arc<Mutex<MockBackendState>>,
    native_rate: u32,
    native_channels: u16,
}

impl MockCaptureBackend {
    /// Creates a backend reporting 48 kHz stereo as every device's native
    /// format.
    pub fn new() -> Self {
        Self::with_format(48_000, 2)
    }

    /// Creates a backend reporting the given native format.
    pub fn with_format(native_rate: u32, native_channels: u16) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockBackendState::default())),
            native_rate,
            native_channels,
        }
    }

    /// Makes `start_capture` fail for the given uid.
    pub fn fail_for(&self, uid: &str) {
        self.state.lock().fail_uids.push(uid.to_string());
    }

    /// Feeds native samples into the live capture callback, if any.
    /// Returns `true` if a callback was invoked.
    pub fn feed(&self, samples: &[f32]) -> bool {
        let mut state = self.state.lock();
        match state.callback.as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    /// uids capture was started for, in order.
    pub fn started(&self) -> Vec<String> {
        self.state.lock().started.clone()
    }

    /// uids whose sessions have been stopped, in order.
    pub fn stopped(&self) -> Vec<String> {
        self.state.lock().stopped.clone()
    }

    /// Returns `true` while a session is live.
    pub fn is_capturing(&self) -> bool {
        self.state.lock().callback.is_some()
    }
}

impl CaptureBackend for MockCaptureBackend {
    fn native_format(&self, _selection: &ResolvedSelection) -> Result<(u32, u16), CaptureError> {
        Ok((self.native_rate, self.native_channels))
    }

    fn start_capture(
        &self,
        selection: &ResolvedSelection,
        callback: AudioCallback,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let mut state = self.state.lock();
        if state.fail_uids.contains(&selection.uid) {
            return Err(CaptureError::DeviceNotFound {
                name: selection.name.clone(),
            });
        }
        state.callback = Some(callback);
        state.started.push(selection.uid.clone());
        Ok(Box::new(MockCaptureHandle {
            state: self.state.clone(),
            uid: selection.uid.clone(),
        }))
    }
}

struct MockCaptureHandle {
    state: Arc<Mutex<MockBackendState>>,
    uid: String,
}

impl CaptureHandle for MockCaptureHandle {}

impl Drop for MockCaptureHandle {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.callback = None;
        state.stopped.push(self.uid.clone());
    }
}

/// Default-input selector that records set calls.
#[derive(Clone, Default)]
pub struct MockDefaultInput {
    current: Arc<Mutex<Option<String>>>,
    history: Arc<Mutex<Vec<String>>>,
}

impl MockDefaultInput {
    /// Creates a selector with the given initial default.
    pub fn with_default(uid: &str) -> Self {
        let selector = Self::default();
        *selector.current.lock() = Some(uid.to_string());
        selector
    }

    /// Every uid passed to `set_default`, in order.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }
}

impl DefaultInputSelector for MockDefaultInput {
    fn current_default(&self) -> Option<String> {
        self.current.lock().clone()
    }

    fn set_default(&self, uid: &str) -> Result<(), CaptureError> {
        *self.current.lock() = Some(uid.to_string());
        self.history.lock().push(uid.to_string());
        Ok(())
    }
}
