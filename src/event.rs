//! Engine event notifications.

use std::sync::Arc;

use crate::priority::ResolvedSelection;

/// Observable state changes emitted by the engine control loop.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The resolved device changed (either side may be `None`).
    ResolvedChanged {
        /// Previous selection.
        previous: Option<ResolvedSelection>,
        /// New selection.
        current: Option<ResolvedSelection>,
    },
    /// A capture session is live on the device.
    CaptureStarted {
        /// uid of the captured device.
        uid: String,
    },
    /// The capture session on the device was stopped.
    CaptureStopped {
        /// uid of the device.
        uid: String,
    },
    /// Starting capture on the resolved device failed.
    CaptureFailed {
        /// uid of the device.
        uid: String,
        /// Human-readable reason.
        reason: String,
    },
    /// The captured device was flagged silent and excluded from resolution.
    DeviceSilenced {
        /// uid of the device.
        uid: String,
    },
    /// A previously silent device produced audio again.
    DeviceAudible {
        /// uid of the device.
        uid: String,
    },
    /// The set of connected input devices changed.
    TopologyChanged {
        /// Number of connected input devices.
        connected: usize,
    },
}

/// Callback invoked for every [`EngineEvent`].
///
/// Called from the engine control task; implementations should hand off any
/// heavy work.
pub type EventCallback = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Wraps a closure as an [`EventCallback`].
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(EngineEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
