//! CPAL-backed device enumeration.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::RegistryError;
use crate::registry::{Device, DeviceEnumerator, Topology, TransportKind};

/// Enumerates input devices through the default CPAL host.
///
/// CPAL does not surface platform device uids or transport kinds, so the uid
/// is synthesized from the device name and the transport reported as
/// `Unknown`. A platform-specific enumerator can replace this implementation
/// behind the same trait where real uids are available.
#[derive(Debug, Default)]
pub struct CpalEnumerator;

impl CpalEnumerator {
    /// Creates the enumerator.
    pub fn new() -> Self {
        Self
    }

    fn synthesize_uid(name: &str) -> String {
        format!("cpal:{name}")
    }
}

impl DeviceEnumerator for CpalEnumerator {
    fn snapshot(&self) -> Result<Topology, RegistryError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| RegistryError::EnumerationFailed {
                reason: e.to_string(),
            })?;

        let mut snapshot = Topology::default();
        for (index, device) in devices.enumerate() {
            let Ok(name) = device.name() else {
                continue;
            };
            snapshot.devices.push(Device {
                transient_id: index as u32,
                uid: Self::synthesize_uid(&name),
                name,
                transport: TransportKind::Unknown,
            });
        }

        snapshot.default_uid = host
            .default_input_device()
            .and_then(|d| d.name().ok())
            .map(|name| Self::synthesize_uid(&name));

        Ok(snapshot)
    }
}
