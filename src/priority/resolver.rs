//! Pure priority resolution.
//!
//! `resolve` is deterministic and side-effect-free; it is re-run on every
//! change to any input and its output drives the capture engine. Callers must
//! suppress duplicate consecutive results so recomputation never restarts a
//! session (the engine control loop dedupes by uid).

use std::collections::HashSet;

use crate::priority::PriorityEntry;
use crate::registry::{Topology, TransportKind};

/// The device the priority engine currently selects. Derived state, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSelection {
    /// Stable identifier of the selected device.
    pub uid: String,
    /// Name of the selected device.
    pub name: String,
    /// Transport of the selected device.
    pub transport: TransportKind,
}

impl From<&PriorityEntry> for ResolvedSelection {
    fn from(entry: &PriorityEntry) -> Self {
        Self {
            uid: entry.uid.clone(),
            name: entry.name.clone(),
            transport: entry.transport,
        }
    }
}

/// Maps the full input state to the currently selected device.
///
/// Rules, in order:
///
/// 1. Globally disabled → `None`.
/// 2. A forced uid that is connected and remembered wins regardless of list
///    order, enabled flag, or silence.
/// 3. Otherwise the first entry in priority order that is enabled, connected,
///    not flagged silent, and whose dependency (by name) is connected.
pub fn resolve(
    entries: &[PriorityEntry],
    topology: &Topology,
    enabled_global: bool,
    forced_uid: Option<&str>,
    silent_uids: &HashSet<String>,
) -> Option<ResolvedSelection> {
    if !enabled_global {
        return None;
    }

    if let Some(forced) = forced_uid {
        if topology.contains_uid(forced) {
            if let Some(entry) = entries.iter().find(|e| e.uid == forced) {
                return Some(entry.into());
            }
        }
    }

    let connected_names = topology.names();
    entries
        .iter()
        .find(|entry| {
            entry.enabled
                && topology.contains_uid(&entry.uid)
                && !silent_uids.contains(&entry.uid)
                && entry
                    .depends_on
                    .as_ref()
                    .is_none_or(|name| connected_names.contains(name))
        })
        .map(ResolvedSelection::from)
}
