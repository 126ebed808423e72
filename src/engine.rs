//! The engine: glue between the registry, the priority store, the resolver,
//! the capture pipeline, and the silence detector.
//!
//! [`AutoMic::builder`] wires the pieces together and
//! [`AutoMicBuilder::start`] spawns the control task. The task owns the
//! capture engine and recomputes resolution whenever any input changes:
//! topology updates from the registry, user mutations through the [`Engine`]
//! handle, and silence transitions from the detector. Consecutive identical
//! resolutions are deduped by uid so recomputation never restarts a session.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capture::{
    CaptureBackend, CaptureEngine, CaptureState, CpalCaptureBackend, DefaultInputSelector,
    NoopDefaultInput, SilenceDetector, SilenceTransition,
};
use crate::config::{self, StoredConfig};
use crate::driver;
use crate::event::{EngineEvent, EventCallback};
use crate::priority::{resolve, PriorityEntry, PriorityStore, ResolvedSelection};
use crate::registry::{CpalEnumerator, DeviceEnumerator, DeviceRegistry, Topology};
use crate::ring::DEFAULT_REGION_PATH;

/// Entry point for building an [`Engine`].
pub struct AutoMic;

impl AutoMic {
    /// Starts building an engine with default wiring.
    pub fn builder() -> AutoMicBuilder {
        AutoMicBuilder::new()
    }
}

/// Configures and starts the engine.
pub struct AutoMicBuilder {
    enumerator: Option<Arc<dyn DeviceEnumerator>>,
    capture_backend: Option<Arc<dyn CaptureBackend>>,
    default_input: Option<Arc<dyn DefaultInputSelector>>,
    config_path: Option<PathBuf>,
    region_path: PathBuf,
    virtual_uid: String,
    poll_interval: Duration,
    silence_threshold: f32,
    silence_window: Duration,
    silence_poll: Duration,
    event_callback: Option<EventCallback>,
}

impl Default for AutoMicBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoMicBuilder {
    /// Creates a builder with production defaults.
    pub fn new() -> Self {
        Self {
            enumerator: None,
            capture_backend: None,
            default_input: None,
            config_path: None,
            region_path: PathBuf::from(DEFAULT_REGION_PATH),
            virtual_uid: driver::DEVICE_UID.to_string(),
            poll_interval: DeviceRegistry::DEFAULT_POLL_INTERVAL,
            silence_threshold: SilenceDetector::DEFAULT_THRESHOLD,
            silence_window: SilenceDetector::DEFAULT_WINDOW,
            silence_poll: SilenceDetector::DEFAULT_POLL_INTERVAL,
            event_callback: None,
        }
    }

    /// Replaces the device enumerator (tests use a mock).
    pub fn enumerator(mut self, enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        self.enumerator = Some(enumerator);
        self
    }

    /// Replaces the capture backend.
    pub fn capture_backend(mut self, backend: Arc<dyn CaptureBackend>) -> Self {
        self.capture_backend = Some(backend);
        self
    }

    /// Replaces the default-input selector.
    pub fn default_input(mut self, selector: Arc<dyn DefaultInputSelector>) -> Self {
        self.default_input = Some(selector);
        self
    }

    /// Sets the priority-list config file path.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Sets the shared-memory region path.
    pub fn region_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.region_path = path.into();
        self
    }

    /// Sets the uid of the virtual device, excluded from reconciliation and
    /// claimed as system default while capturing.
    pub fn virtual_uid(mut self, uid: impl Into<String>) -> Self {
        self.virtual_uid = uid.into();
        self
    }

    /// Sets the registry poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the silence threshold, window, and poll cadence.
    pub fn silence(mut self, threshold: f32, window: Duration, poll: Duration) -> Self {
        self.silence_threshold = threshold;
        self.silence_window = window;
        self.silence_poll = poll;
        self
    }

    /// Installs an event callback.
    pub fn on_event(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    /// Loads the persisted priority list, starts the registry, and spawns
    /// the control task. Must be called within a tokio runtime.
    pub async fn start(self) -> Engine {
        let config_path = self.config_path.unwrap_or_else(config::default_config_path);
        let stored = config::load(&config_path);
        let store = PriorityStore::from_entries(stored.entries);
        tracing::info!(
            config = %config_path.display(),
            entries = store.len(),
            "engine starting"
        );

        let enumerator = self
            .enumerator
            .unwrap_or_else(|| Arc::new(CpalEnumerator::new()));
        let backend = self
            .capture_backend
            .unwrap_or_else(|| Arc::new(CpalCaptureBackend::new()));
        let default_input = self
            .default_input
            .unwrap_or_else(|| Arc::new(NoopDefaultInput::new()));

        let (dirty_tx, dirty_rx) = watch::channel(0u64);
        let ctl = Arc::new(ControlState {
            store: Mutex::new(store),
            enabled: AtomicBool::new(true),
            forced: Mutex::new(None),
            silent: Mutex::new(HashSet::new()),
            dirty_tx,
            config_path,
        });

        let registry = DeviceRegistry::start(enumerator, self.poll_interval);
        let topology_rx = registry.subscribe();

        let capture = CaptureEngine::new(
            backend,
            default_input,
            &self.region_path,
            &self.virtual_uid,
        );
        let detector = SilenceDetector::new(
            capture.peak_meter(),
            self.silence_threshold,
            self.silence_window,
        );

        let (resolved_tx, resolved_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(control_loop(ControlLoop {
            ctl: ctl.clone(),
            topology_rx,
            dirty_rx,
            shutdown_rx,
            capture,
            detector,
            resolved_tx,
            events: self.event_callback,
            silence_poll: self.silence_poll,
            virtual_uid: self.virtual_uid,
        }));

        Engine {
            ctl,
            resolved_rx,
            shutdown_tx,
            registry: Some(registry),
            task: Some(task),
        }
    }
}

/// State shared between the [`Engine`] handle and the control task.
struct ControlState {
    store: Mutex<PriorityStore>,
    enabled: AtomicBool,
    forced: Mutex<Option<String>>,
    silent: Mutex<HashSet<String>>,
    dirty_tx: watch::Sender<u64>,
    config_path: PathBuf,
}

impl ControlState {
    /// Wakes the control task for a resolution recompute.
    fn bump(&self) {
        self.dirty_tx.send_modify(|n| *n = n.wrapping_add(1));
    }

    fn persist(&self, store: &PriorityStore) {
        let stored = StoredConfig {
            entries: store.entries().to_vec(),
        };
        if let Err(error) = config::save(&self.config_path, &stored) {
            tracing::warn!(%error, "failed to persist priority list");
        }
    }
}

/// Running engine handle.
///
/// Mutations persist the priority list and wake the control task; the task
/// applies the consequences (starting, switching, or stopping capture)
/// asynchronously.
pub struct Engine {
    ctl: Arc<ControlState>,
    resolved_rx: watch::Receiver<Option<ResolvedSelection>>,
    shutdown_tx: watch::Sender<bool>,
    registry: Option<DeviceRegistry>,
    task: Option<JoinHandle<()>>,
}

impl Engine {
    /// The priority list, highest priority first.
    pub fn entries(&self) -> Vec<PriorityEntry> {
        self.ctl.store.lock().entries().to_vec()
    }

    /// The currently resolved device.
    pub fn resolved(&self) -> Option<ResolvedSelection> {
        self.resolved_rx.borrow().clone()
    }

    /// A receiver observing every resolution change.
    pub fn subscribe_resolved(&self) -> watch::Receiver<Option<ResolvedSelection>> {
        self.resolved_rx.clone()
    }

    /// Returns `true` while routing is globally enabled.
    pub fn is_enabled(&self) -> bool {
        self.ctl.enabled.load(Ordering::Relaxed)
    }

    /// Enables or disables routing globally. Disabling resolves to no device
    /// and tears down any live capture session.
    pub fn set_enabled(&self, enabled: bool) {
        self.ctl.enabled.store(enabled, Ordering::Relaxed);
        self.ctl.bump();
    }

    /// Forces a specific device, or clears the override with `None`. The
    /// override is in-memory only and does not reorder the list.
    pub fn force_device(&self, uid: Option<String>) {
        *self.ctl.forced.lock() = uid;
        self.ctl.bump();
    }

    /// Moves an entry to the given position (clamped). Returns `false` if
    /// the uid is unknown.
    pub fn move_entry(&self, uid: &str, index: usize) -> bool {
        self.mutate(|store| store.move_entry(uid, index))
    }

    /// Sets an entry's enabled flag. Returns `false` if the uid is unknown.
    pub fn set_entry_enabled(&self, uid: &str, enabled: bool) -> bool {
        self.mutate(|store| store.set_enabled(uid, enabled))
    }

    /// Sets or clears an entry's dependency name. Returns `false` if the uid
    /// is unknown.
    pub fn set_depends_on(&self, uid: &str, depends_on: Option<String>) -> bool {
        self.mutate(|store| store.set_depends_on(uid, depends_on))
    }

    /// Removes an entry. Returns `false` if the uid is unknown. A removed
    /// device that is still connected will be re-remembered at the bottom of
    /// the list on the next reconcile.
    pub fn remove_entry(&self, uid: &str) -> bool {
        self.mutate(|store| store.remove(uid))
    }

    fn mutate(&self, f: impl FnOnce(&mut PriorityStore) -> bool) -> bool {
        let changed = {
            let mut store = self.ctl.store.lock();
            let changed = f(&mut store);
            if changed {
                self.ctl.persist(&store);
            }
            changed
        };
        if changed {
            self.ctl.bump();
        }
        changed
    }

    /// Stops the control task and the registry, tearing down any live
    /// capture session.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        if let Some(registry) = self.registry.take() {
            registry.stop().await;
        }
        tracing::info!("engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct ControlLoop {
    ctl: Arc<ControlState>,
    topology_rx: watch::Receiver<Topology>,
    dirty_rx: watch::Receiver<u64>,
    shutdown_rx: watch::Receiver<bool>,
    capture: CaptureEngine,
    detector: SilenceDetector,
    resolved_tx: watch::Sender<Option<ResolvedSelection>>,
    events: Option<EventCallback>,
    silence_poll: Duration,
    virtual_uid: String,
}

async fn control_loop(mut lp: ControlLoop) {
    let mut silence_interval = tokio::time::interval(lp.silence_poll);
    silence_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_uid: Option<String> = None;

    // Fold the initial topology in and take the first resolution.
    let initial = lp.topology_rx.borrow_and_update().clone();
    reconcile(&lp.ctl, &initial, &lp.virtual_uid);
    apply_resolution(&mut lp, &mut last_uid);

    enum Wake {
        Topology,
        Dirty,
        Silence,
        Shutdown,
    }

    loop {
        // Arms only classify the wakeup; all work happens below, once the
        // select's borrows are released.
        let wake = tokio::select! {
            changed = lp.topology_rx.changed() => {
                if changed.is_err() { Wake::Shutdown } else { Wake::Topology }
            }
            changed = lp.dirty_rx.changed() => {
                if changed.is_err() { Wake::Shutdown } else { Wake::Dirty }
            }
            _ = silence_interval.tick() => Wake::Silence,
            _ = lp.shutdown_rx.changed() => Wake::Shutdown,
        };

        match wake {
            Wake::Topology => {
                let topology = lp.topology_rx.borrow_and_update().clone();
                lp.ctl.silent.lock().retain(|uid| topology.contains_uid(uid));
                reconcile(&lp.ctl, &topology, &lp.virtual_uid);
                emit(&lp.events, EngineEvent::TopologyChanged {
                    connected: topology.devices.len(),
                });
            }
            Wake::Dirty => {}
            Wake::Silence => {
                if !poll_silence(&mut lp) {
                    continue;
                }
            }
            Wake::Shutdown => break,
        }

        apply_resolution(&mut lp, &mut last_uid);
    }

    lp.capture.teardown();
    let _ = lp.resolved_tx.send(None);
}

fn emit(events: &Option<EventCallback>, event: EngineEvent) {
    if let Some(callback) = events {
        callback(event);
    }
}

fn reconcile(ctl: &ControlState, topology: &Topology, virtual_uid: &str) {
    let mut store = ctl.store.lock();
    let before = store.clone();
    store.reconcile(&topology.devices, Some(virtual_uid));
    if *store != before {
        ctl.persist(&store);
    }
}

/// Polls the silence detector; returns `true` if a transition happened and
/// resolution must be recomputed.
fn poll_silence(lp: &mut ControlLoop) -> bool {
    if lp.capture.state() != CaptureState::Capturing {
        return false;
    }
    let Some(uid) = lp.capture.current_uid().map(String::from) else {
        return false;
    };
    match lp.detector.poll() {
        Some(SilenceTransition::BecameSilent) => {
            tracing::info!(%uid, "captured device went silent");
            lp.ctl.silent.lock().insert(uid.clone());
            emit(&lp.events, EngineEvent::DeviceSilenced { uid });
            true
        }
        Some(SilenceTransition::BecameAudible) => {
            tracing::info!(%uid, "captured device is audible again");
            lp.ctl.silent.lock().remove(&uid);
            emit(&lp.events, EngineEvent::DeviceAudible { uid });
            true
        }
        None => false,
    }
}

fn apply_resolution(lp: &mut ControlLoop, last_uid: &mut Option<String>) {
    let topology = lp.topology_rx.borrow().clone();
    let resolved = {
        let store = lp.ctl.store.lock();
        let forced = lp.ctl.forced.lock();
        let silent = lp.ctl.silent.lock();
        resolve(
            store.entries(),
            &topology,
            lp.ctl.enabled.load(Ordering::Relaxed),
            forced.as_deref(),
            &silent,
        )
    };

    let resolved_uid = resolved.as_ref().map(|r| r.uid.clone());
    if resolved_uid == *last_uid {
        return;
    }

    let previous = lp
        .ctl
        .store
        .lock()
        .entries()
        .iter()
        .find(|e| Some(&e.uid) == last_uid.as_ref())
        .map(ResolvedSelection::from);
    emit(
        &lp.events,
        EngineEvent::ResolvedChanged {
            previous,
            current: resolved.clone(),
        },
    );

    let was_capturing = lp.capture.current_uid().map(String::from);
    let result = lp.capture.apply(resolved.as_ref());
    let now_capturing = lp.capture.current_uid().map(String::from);

    if let Some(stopped) = was_capturing {
        if Some(&stopped) != now_capturing.as_ref() {
            emit(&lp.events, EngineEvent::CaptureStopped { uid: stopped });
        }
    }
    match result {
        Ok(()) => {
            if let Some(uid) = now_capturing {
                emit(&lp.events, EngineEvent::CaptureStarted { uid });
            }
            lp.detector.reset();
        }
        Err(error) => {
            if let Some(uid) = &resolved_uid {
                emit(
                    &lp.events,
                    EngineEvent::CaptureFailed {
                        uid: uid.clone(),
                        reason: error.to_string(),
                    },
                );
            }
        }
    }

    let _ = lp.resolved_tx.send(resolved);
    *last_uid = resolved_uid;
}
