//! Device enumeration and live topology change notification.
//!
//! The registry polls a [`DeviceEnumerator`] for the connected input devices
//! and fans out a [`Topology`] snapshot on a watch channel whenever the set
//! changes. Enumeration itself (stable uids, transport kinds, the default
//! device hint) is an OS capability consumed through the trait; the cpal
//! implementation lives in [`cpal_backend`] and a scriptable mock for tests
//! in [`mock`].

mod cpal_backend;
mod mock;

pub use cpal_backend::CpalEnumerator;
pub use mock::MockEnumerator;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::RegistryError;

/// How a device is attached to the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Built-in microphone.
    BuiltIn,
    /// USB-attached device.
    Usb,
    /// Bluetooth device.
    Bluetooth,
    /// Aggregate of other devices.
    Aggregate,
    /// Software-only device.
    Virtual,
    /// Transport could not be determined.
    Unknown,
}

/// A connected input device.
///
/// `uid` is the durable identity used by every higher layer; `transient_id`
/// is reassigned by the OS each boot/reconnect and must never be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// OS-assigned numeric handle, valid only for the current session.
    pub transient_id: u32,
    /// Human-readable device name.
    pub name: String,
    /// Stable, transport-assigned persistent identifier.
    pub uid: String,
    /// How the device is attached.
    pub transport: TransportKind,
}

/// Snapshot of the connected input devices plus the default-device hint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    /// Connected input devices.
    pub devices: Vec<Device>,
    /// uid of the system default input, if known.
    pub default_uid: Option<String>,
}

impl Topology {
    /// Returns `true` if a device with the given uid is connected.
    pub fn contains_uid(&self, uid: &str) -> bool {
        self.devices.iter().any(|device| device.uid == uid)
    }

    /// Returns the connected device with the given uid.
    pub fn device(&self, uid: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.uid == uid)
    }

    /// Set of connected uids.
    pub fn uids(&self) -> HashSet<String> {
        self.devices.iter().map(|d| d.uid.clone()).collect()
    }

    /// Set of connected device names.
    pub fn names(&self) -> HashSet<String> {
        self.devices.iter().map(|d| d.name.clone()).collect()
    }
}

/// Boundary trait for OS device enumeration.
///
/// Implementations map whatever the platform exposes into [`Device`] values
/// with stable uids. Must be cheap enough to poll once a second.
pub trait DeviceEnumerator: Send + Sync {
    /// Enumerates the currently connected input devices and the default
    /// input hint.
    fn snapshot(&self) -> Result<Topology, RegistryError>;
}

/// Polls an enumerator and broadcasts topology changes.
pub struct DeviceRegistry {
    topology_rx: watch::Receiver<Topology>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceRegistry {
    /// Default poll interval.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Takes an initial snapshot and spawns the polling task.
    ///
    /// Enumeration failures are logged and skipped; the previous snapshot
    /// stays current until a later poll succeeds.
    pub fn start(enumerator: Arc<dyn DeviceEnumerator>, poll_interval: Duration) -> Self {
        let initial = enumerator.snapshot().unwrap_or_else(|error| {
            tracing::warn!(%error, "initial device enumeration failed");
            Topology::default()
        });
        let (topology_tx, topology_rx) = watch::channel(initial);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }

                let snapshot = match enumerator.snapshot() {
                    Ok(snapshot) => snapshot,
                    Err(error) => {
                        tracing::warn!(%error, "device enumeration failed; keeping last topology");
                        continue;
                    }
                };

                let changed = *topology_tx.borrow() != snapshot;
                if changed {
                    tracing::info!(
                        devices = snapshot.devices.len(),
                        default = ?snapshot.default_uid,
                        "input device topology changed"
                    );
                    if topology_tx.send(snapshot).is_err() {
                        return;
                    }
                }
            }
        });

        Self {
            topology_rx,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Returns the current topology snapshot.
    pub fn topology(&self) -> Topology {
        self.topology_rx.borrow().clone()
    }

    /// Returns a receiver that observes every topology change.
    pub fn subscribe(&self) -> watch::Receiver<Topology> {
        self.topology_rx.clone()
    }

    /// Stops the polling task.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
