//! Scriptable enumerator for testing without audio hardware.

use parking_lot::Mutex;

use crate::error::RegistryError;
use crate::registry::{Device, DeviceEnumerator, Topology, TransportKind};

/// A mock enumerator whose device set is controlled by the test.
///
/// This allows exercising topology changes (connect, disconnect, uid churn on
/// replug) without actual hardware, making the full resolution pipeline
/// testable in CI.
///
/// # Example
///
/// ```
/// use automic::registry::{MockEnumerator, DeviceEnumerator, TransportKind};
///
/// let mock = MockEnumerator::new();
/// mock.connect("uid-1", "USB Mic", TransportKind::Usb);
/// assert_eq!(mock.snapshot().unwrap().devices.len(), 1);
///
/// mock.disconnect("uid-1");
/// assert!(mock.snapshot().unwrap().devices.is_empty());
/// ```
#[derive(Default)]
pub struct MockEnumerator {
    state: Mutex<Topology>,
}

impl MockEnumerator {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole connected set.
    pub fn set_devices(&self, devices: Vec<Device>) {
        self.state.lock().devices = devices;
    }

    /// Adds a connected device with a fresh transient id.
    pub fn connect(&self, uid: &str, name: &str, transport: TransportKind) {
        let mut state = self.state.lock();
        let transient_id = state.devices.len() as u32 + 1;
        state.devices.push(Device {
            transient_id,
            name: name.to_string(),
            uid: uid.to_string(),
            transport,
        });
    }

    /// Removes a device by uid.
    pub fn disconnect(&self, uid: &str) {
        self.state.lock().devices.retain(|d| d.uid != uid);
    }

    /// Sets the default-input hint.
    pub fn set_default_uid(&self, uid: Option<&str>) {
        self.state.lock().default_uid = uid.map(str::to_string);
    }
}

impl DeviceEnumerator for MockEnumerator {
    fn snapshot(&self) -> Result<Topology, RegistryError> {
        Ok(self.state.lock().clone())
    }
}
