//! Capture pipeline: pulls audio from the resolved physical microphone,
//! converts it to the ring format, and feeds the shared-memory ring.
//!
//! The hardware boundary is two traits. [`CaptureBackend`] opens a native
//! input stream on a device and drives a real-time callback with f32 samples;
//! [`DefaultInputSelector`] reads and sets the system default input so the
//! virtual device can be claimed while a session is live. The cpal
//! implementations live in [`cpal_backend`], scriptable mocks in [`mock`].

mod converter;
mod cpal_backend;
mod engine;
mod mock;
mod silence;

pub use converter::{FormatConverter, TARGET_CHANNELS, TARGET_SAMPLE_RATE};
pub use cpal_backend::{CpalCaptureBackend, NoopDefaultInput};
pub use engine::{CaptureEngine, CaptureState};
pub use mock::{MockCaptureBackend, MockDefaultInput};
pub use silence::{SilenceDetector, SilenceTransition};

use crate::error::CaptureError;
use crate::priority::ResolvedSelection;

/// Callback invoked with interleaved native f32 samples.
///
/// Runs on the backend's real-time audio thread: implementations must not
/// allocate, lock, or block.
pub type AudioCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// RAII handle for a running input stream; dropping it stops the hardware
/// callback before returning.
pub trait CaptureHandle: Send {}

/// Boundary trait for opening native input streams.
pub trait CaptureBackend: Send + Sync {
    /// Returns the device's native `(sample_rate, channels)`.
    fn native_format(&self, selection: &ResolvedSelection) -> Result<(u32, u16), CaptureError>;

    /// Starts capturing from the device, invoking `callback` with native
    /// interleaved f32 samples until the returned handle is dropped.
    fn start_capture(
        &self,
        selection: &ResolvedSelection,
        callback: AudioCallback,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// Boundary trait for the system default input device.
pub trait DefaultInputSelector: Send + Sync {
    /// Returns the uid of the current system default input, if known.
    fn current_default(&self) -> Option<String>;

    /// Makes the device with the given uid the system default input.
    fn set_default(&self, uid: &str) -> Result<(), CaptureError>;
}
