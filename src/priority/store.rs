//! Ordered list of remembered devices and the reconciliation that keeps it
//! stable across reconnects and renames.

use serde::{Deserialize, Serialize};

use crate::registry::{Device, TransportKind};

/// One remembered device in the priority list.
///
/// Index 0 in the store is the highest priority. `depends_on` names another
/// device by *name* (not uid): a virtual/aggregate device is only eligible
/// for resolution while its named dependency is connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityEntry {
    /// Stable device identifier.
    pub uid: String,
    /// Device name as last seen.
    pub name: String,
    /// Transport the device was last seen on.
    #[serde(rename = "transportType")]
    pub transport: TransportKind,
    /// Whether the user allows this device to be resolved.
    pub enabled: bool,
    /// Name of a device that must be connected for this entry to be eligible.
    #[serde(
        rename = "dependsOn",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub depends_on: Option<String>,
}

impl PriorityEntry {
    /// Builds a fresh, enabled entry from a connected device.
    pub fn from_device(device: &Device) -> Self {
        Self {
            uid: device.uid.clone(),
            name: device.name.clone(),
            transport: device.transport,
            enabled: true,
            depends_on: None,
        }
    }
}

/// The ordered priority list.
///
/// Invariant: uids are unique within the list at any instant; order only
/// changes through explicit user moves, never through reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorityStore {
    entries: Vec<PriorityEntry>,
}

impl PriorityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from persisted entries, keeping the first occurrence of
    /// any duplicated uid.
    pub fn from_entries(entries: Vec<PriorityEntry>) -> Self {
        let mut store = Self::new();
        for entry in entries {
            if !store.contains(&entry.uid) {
                store.entries.push(entry);
            }
        }
        store
    }

    /// The entries in priority order.
    pub fn entries(&self) -> &[PriorityEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if an entry with the given uid exists.
    pub fn contains(&self, uid: &str) -> bool {
        self.entries.iter().any(|e| e.uid == uid)
    }

    /// Returns the entry with the given uid.
    pub fn entry(&self, uid: &str) -> Option<&PriorityEntry> {
        self.entries.iter().find(|e| e.uid == uid)
    }

    /// Moves the entry with the given uid to `index` (clamped to the list
    /// length). Returns `false` if no such entry exists.
    pub fn move_entry(&mut self, uid: &str, index: usize) -> bool {
        let Some(from) = self.entries.iter().position(|e| e.uid == uid) else {
            return false;
        };
        let entry = self.entries.remove(from);
        let to = index.min(self.entries.len());
        self.entries.insert(to, entry);
        true
    }

    /// Sets the enabled flag on an entry. Returns `false` if absent.
    pub fn set_enabled(&mut self, uid: &str, enabled: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.uid == uid) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Sets or clears an entry's dependency name. Returns `false` if absent.
    pub fn set_depends_on(&mut self, uid: &str, depends_on: Option<String>) -> bool {
        match self.entries.iter_mut().find(|e| e.uid == uid) {
            Some(entry) => {
                entry.depends_on = depends_on;
                true
            }
            None => false,
        }
    }

    /// Removes the entry with the given uid. Returns `false` if absent.
    pub fn remove(&mut self, uid: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.uid != uid);
        self.entries.len() != before
    }

    /// Folds the currently connected devices into the list.
    ///
    /// Per connected device (skipping `excluded_uid`, normally the virtual
    /// device's own uid):
    ///
    /// 1. uid already present: refresh the entry's name in place (rename).
    /// 2. An entry matches on `(name, transport)` but its uid is no longer
    ///    connected: the device reappeared under a new uid (common for USB
    ///    replugs), so rewrite the uid in place, preserving position,
    ///    `enabled` and `depends_on`.
    /// 3. Otherwise append a fresh enabled entry.
    ///
    /// Afterwards, disconnected entries whose `(name, transport)` collides
    /// with a connected entry are dropped, so ghost duplicates cannot
    /// accumulate across repeated uid churn.
    ///
    /// The `(name, transport)` surrogate key is best-effort: two distinct,
    /// simultaneously-connected devices with identical name and transport
    /// resolve to the first match deterministically.
    pub fn reconcile(&mut self, connected: &[Device], excluded_uid: Option<&str>) {
        let connected_uids: std::collections::HashSet<&str> =
            connected.iter().map(|d| d.uid.as_str()).collect();

        for device in connected {
            if excluded_uid == Some(device.uid.as_str()) {
                continue;
            }

            if let Some(entry) = self.entries.iter_mut().find(|e| e.uid == device.uid) {
                if entry.name != device.name {
                    tracing::info!(uid = %device.uid, from = %entry.name, to = %device.name,
                        "device renamed; updating entry");
                    entry.name = device.name.clone();
                }
                continue;
            }

            let rewrite = self.entries.iter_mut().find(|e| {
                e.name == device.name
                    && e.transport == device.transport
                    && !connected_uids.contains(e.uid.as_str())
            });
            if let Some(entry) = rewrite {
                tracing::info!(name = %device.name, from = %entry.uid, to = %device.uid,
                    "device reappeared under new uid; rewriting entry in place");
                entry.uid = device.uid.clone();
                continue;
            }

            tracing::info!(uid = %device.uid, name = %device.name, "remembering new device");
            self.entries.push(PriorityEntry::from_device(device));
        }

        let connected_keys: std::collections::HashSet<(String, TransportKind)> = self
            .entries
            .iter()
            .filter(|e| connected_uids.contains(e.uid.as_str()))
            .map(|e| (e.name.clone(), e.transport))
            .collect();
        self.entries.retain(|e| {
            connected_uids.contains(e.uid.as_str())
                || !connected_keys.contains(&(e.name.clone(), e.transport))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(uid: &str, name: &str, transport: TransportKind) -> Device {
        Device {
            transient_id: 0,
            name: name.to_string(),
            uid: uid.to_string(),
            transport,
        }
    }

    fn store_abc() -> PriorityStore {
        PriorityStore::from_entries(vec![
            PriorityEntry {
                uid: "uid-a".into(),
                name: "USB Mic".into(),
                transport: TransportKind::Usb,
                enabled: true,
                depends_on: None,
            },
            PriorityEntry {
                uid: "uid-b".into(),
                name: "Headset".into(),
                transport: TransportKind::Bluetooth,
                enabled: false,
                depends_on: Some("USB Mic".into()),
            },
        ])
    }

    #[test]
    fn test_reconcile_appends_unknown_devices() {
        let mut store = PriorityStore::new();
        store.reconcile(
            &[device("uid-a", "USB Mic", TransportKind::Usb)],
            None,
        );
        assert_eq!(store.len(), 1);
        assert!(store.entries()[0].enabled);
        assert!(store.entries()[0].depends_on.is_none());
    }

    #[test]
    fn test_reconcile_skips_excluded_uid() {
        let mut store = PriorityStore::new();
        store.reconcile(
            &[device("uid-virtual", "AutoMic", TransportKind::Virtual)],
            Some("uid-virtual"),
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_reconcile_updates_name_in_place() {
        let mut store = store_abc();
        store.reconcile(
            &[device("uid-a", "USB Mic Pro", TransportKind::Usb)],
            None,
        );
        assert_eq!(store.entries()[0].name, "USB Mic Pro");
        assert_eq!(store.entries()[0].uid, "uid-a");
    }

    #[test]
    fn test_reconcile_rewrites_uid_preserving_position_and_flags() {
        let mut store = store_abc();
        // Headset replugs with a fresh uid; uid-b is gone from the bus.
        store.reconcile(
            &[device("uid-b2", "Headset", TransportKind::Bluetooth)],
            None,
        );

        assert_eq!(store.len(), 2);
        let entry = &store.entries()[1];
        assert_eq!(entry.uid, "uid-b2");
        assert!(!entry.enabled);
        assert_eq!(entry.depends_on.as_deref(), Some("USB Mic"));
    }

    #[test]
    fn test_reconcile_no_rewrite_when_old_uid_still_connected() {
        let mut store = store_abc();
        // Same name+transport as uid-b, but uid-b is also connected: this is
        // a second physical device, not a replug.
        store.reconcile(
            &[
                device("uid-b", "Headset", TransportKind::Bluetooth),
                device("uid-b2", "Headset", TransportKind::Bluetooth),
            ],
            None,
        );
        assert!(store.contains("uid-b"));
        assert!(store.contains("uid-b2"));
    }

    #[test]
    fn test_reconcile_cleans_stale_duplicates() {
        let mut store = PriorityStore::from_entries(vec![
            PriorityEntry {
                uid: "uid-old".into(),
                name: "USB Mic".into(),
                transport: TransportKind::Usb,
                enabled: true,
                depends_on: None,
            },
            PriorityEntry {
                uid: "uid-new".into(),
                name: "USB Mic".into(),
                transport: TransportKind::Usb,
                enabled: true,
                depends_on: None,
            },
        ]);
        store.reconcile(&[device("uid-new", "USB Mic", TransportKind::Usb)], None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].uid, "uid-new");
    }

    #[test]
    fn test_reconcile_keeps_disconnected_entries_without_collision() {
        let mut store = store_abc();
        store.reconcile(&[], None);
        // Nothing connected: the remembered list survives untouched.
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut store = store_abc();
        let connected = [
            device("uid-a2", "USB Mic", TransportKind::Usb),
            device("uid-c", "Built-in", TransportKind::BuiltIn),
        ];
        store.reconcile(&connected, None);
        let after_first = store.clone();
        store.reconcile(&connected, None);
        assert_eq!(store, after_first);
    }

    #[test]
    fn test_move_entry_clamps_index() {
        let mut store = store_abc();
        assert!(store.move_entry("uid-a", 99));
        assert_eq!(store.entries()[1].uid, "uid-a");
        assert!(store.move_entry("uid-a", 0));
        assert_eq!(store.entries()[0].uid, "uid-a");
        assert!(!store.move_entry("uid-missing", 0));
    }

    #[test]
    fn test_from_entries_dedupes_uids() {
        let entry = PriorityEntry {
            uid: "uid-a".into(),
            name: "USB Mic".into(),
            transport: TransportKind::Usb,
            enabled: true,
            depends_on: None,
        };
        let store = PriorityStore::from_entries(vec![entry.clone(), entry]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_entry_serde_field_names() {
        let entry = PriorityEntry {
            uid: "uid-a".into(),
            name: "USB Mic".into(),
            transport: TransportKind::Usb,
            enabled: true,
            depends_on: Some("Dock".into()),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"transportType\":\"usb\""));
        assert!(json.contains("\"dependsOn\":\"Dock\""));

        let without: PriorityEntry =
            serde_json::from_str(r#"{"uid":"u","name":"n","transportType":"usb","enabled":false}"#)
                .unwrap();
        assert!(without.depends_on.is_none());
    }
}
