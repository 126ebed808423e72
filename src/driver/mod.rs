//! The virtual input device.
//!
//! This is the read side of the shared-memory ring wrapped in the lifecycle
//! and property protocol an audio host drives: initialize, client tracking,
//! start/stop IO, zero-timestamp accounting, and per-cycle input reads. The
//! host-facing behavior mirrors a server-owned plugin: the device is always
//! alive, publishes exactly one input stream in the canonical format, and
//! produces silence whenever the capture side is missing or starved.

mod properties;

pub use properties::{
    has_property, is_settable, property, set_property, translate_uid, ClassId, ObjectId,
    PropertyValue, RangedStreamFormat, Scope, Selector, StreamFormat, DIRECTION_INPUT,
    TERMINAL_TYPE_MICROPHONE,
};

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::ring::{RingConsumer, DEFAULT_REGION_PATH, RING_SAMPLE_RATE};

/// Name the device presents to the host.
pub const DEVICE_NAME: &str = "AutoMic";

/// Stable uid of the virtual device.
pub const DEVICE_UID: &str = "com.automic.device";

/// Model uid of the virtual device.
pub const MODEL_UID: &str = "com.automic.model";

/// Manufacturer string.
pub const MANUFACTURER: &str = "AutoMic";

/// IO period in frames; the host re-anchors its timeline every period.
pub const ZERO_TIMESTAMP_PERIOD_FRAMES: u32 = 512;

/// Lifecycle state of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Constructed but not yet initialized by the host.
    Unloaded,
    /// Initialized; no IO in flight.
    Initialized,
    /// IO cycles are running.
    Running,
    /// IO has been stopped after running.
    Stopped,
}

/// Zero-timestamp answer for one host query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZeroTimestamp {
    /// Sample position of the most recent period boundary.
    pub sample_time: f64,
    /// Host-clock offset of that boundary from IO start.
    pub host_offset: Duration,
    /// Timeline generation; bumps would signal a discontinuity.
    pub seed: u64,
}

/// Host-driven driver state machine plus the ring read side.
pub struct DriverContext {
    state: DriverState,
    region_path: PathBuf,
    consumer: Option<RingConsumer>,
    client_count: u32,
    io_anchor: Option<Instant>,
}

impl DriverContext {
    /// Creates an unloaded context reading from the given region path.
    pub fn new(region_path: &Path) -> Self {
        Self {
            state: DriverState::Unloaded,
            region_path: region_path.to_path_buf(),
            consumer: None,
            client_count: 0,
            io_anchor: None,
        }
    }

    /// Creates a context on the default region path.
    pub fn at_default_path() -> Self {
        Self::new(Path::new(DEFAULT_REGION_PATH))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Returns `true` while IO is running.
    pub fn is_running(&self) -> bool {
        self.state == DriverState::Running
    }

    /// Number of host clients attached to the device.
    pub fn client_count(&self) -> u32 {
        self.client_count
    }

    /// Host initialization; a no-op if already initialized.
    pub fn initialize(&mut self) {
        if self.state == DriverState::Unloaded {
            self.state = DriverState::Initialized;
            tracing::info!(uid = DEVICE_UID, "virtual device initialized");
        }
    }

    /// Records a new host client.
    pub fn add_client(&mut self) {
        self.client_count += 1;
        tracing::debug!(clients = self.client_count, "device client added");
    }

    /// Records a departing host client.
    pub fn remove_client(&mut self) {
        self.client_count = self.client_count.saturating_sub(1);
        tracing::debug!(clients = self.client_count, "device client removed");
    }

    /// Starts IO: anchors the timeline and tries to map the ring.
    ///
    /// The region file may not exist yet; that is not an error, the mapping
    /// is retried lazily from [`read_input`](Self::read_input).
    pub fn start_io(&mut self) {
        if self.state == DriverState::Running {
            return;
        }
        self.io_anchor = Some(Instant::now());

        let mut consumer = RingConsumer::new(&self.region_path);
        if consumer.try_open() {
            tracing::info!("IO started; ring mapped");
        } else {
            tracing::info!("IO started; ring not yet available");
        }
        self.consumer = Some(consumer);
        self.state = DriverState::Running;
    }

    /// Stops IO and unmaps the ring.
    pub fn stop_io(&mut self) {
        if self.state != DriverState::Running {
            return;
        }
        if let Some(mut consumer) = self.consumer.take() {
            consumer.close();
        }
        self.io_anchor = None;
        self.state = DriverState::Stopped;
        tracing::info!("IO stopped");
    }

    /// Timeline position for the host: the most recent whole IO period since
    /// `start_io`. Returns `None` unless IO is running.
    pub fn zero_timestamp(&self) -> Option<ZeroTimestamp> {
        self.zero_timestamp_at(Instant::now())
    }

    fn zero_timestamp_at(&self, now: Instant) -> Option<ZeroTimestamp> {
        let anchor = self.io_anchor?;
        let period =
            Duration::from_nanos(u64::from(ZERO_TIMESTAMP_PERIOD_FRAMES) * 1_000_000_000 / u64::from(RING_SAMPLE_RATE));
        let elapsed = now.saturating_duration_since(anchor);
        let periods = (elapsed.as_nanos() / period.as_nanos()) as u64;
        Some(ZeroTimestamp {
            sample_time: (periods * u64::from(ZERO_TIMESTAMP_PERIOD_FRAMES)) as f64,
            host_offset: period * u32::try_from(periods).unwrap_or(u32::MAX),
            seed: 1,
        })
    }

    /// Fills one IO cycle's worth of interleaved stereo frames.
    ///
    /// Outside `Running`, or whenever the producer is absent, inactive, or
    /// starved, the buffer is zero-filled; the cycle itself never fails.
    /// Returns `true` when real audio was delivered.
    pub fn read_input(&mut self, out: &mut [f32]) -> bool {
        if self.state != DriverState::Running {
            out.fill(0.0);
            return false;
        }
        match self.consumer.as_mut() {
            Some(consumer) => consumer.read_or_silence(out),
            None => {
                out.fill(0.0);
                false
            }
        }
    }

    /// Answers a property read against the live IO state.
    pub fn property(
        &self,
        object: ObjectId,
        selector: Selector,
        scope: Scope,
    ) -> Result<PropertyValue, crate::error::PropertyError> {
        properties::property(object, selector, scope, self.is_running())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingProducer;
    use tempfile::tempdir;

    #[test]
    fn test_lifecycle_transitions() {
        let dir = tempdir().unwrap();
        let mut ctx = DriverContext::new(&dir.path().join("test.ring"));
        assert_eq!(ctx.state(), DriverState::Unloaded);

        ctx.initialize();
        assert_eq!(ctx.state(), DriverState::Initialized);
        ctx.initialize();
        assert_eq!(ctx.state(), DriverState::Initialized);

        ctx.start_io();
        assert!(ctx.is_running());
        ctx.start_io();
        assert!(ctx.is_running());

        ctx.stop_io();
        assert_eq!(ctx.state(), DriverState::Stopped);
        ctx.start_io();
        assert!(ctx.is_running());
    }

    #[test]
    fn test_client_counting() {
        let dir = tempdir().unwrap();
        let mut ctx = DriverContext::new(&dir.path().join("test.ring"));
        ctx.add_client();
        ctx.add_client();
        assert_eq!(ctx.client_count(), 2);
        ctx.remove_client();
        ctx.remove_client();
        ctx.remove_client();
        assert_eq!(ctx.client_count(), 0);
    }

    #[test]
    fn test_read_before_running_is_silence() {
        let dir = tempdir().unwrap();
        let mut ctx = DriverContext::new(&dir.path().join("test.ring"));
        ctx.initialize();

        let mut out = vec![0.5f32; 64];
        assert!(!ctx.read_input(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_io_without_producer_then_with_producer() {
        let dir = tempdir().unwrap();
        let region = dir.path().join("test.ring");
        let mut ctx = DriverContext::new(&region);
        ctx.initialize();
        ctx.start_io(); // region does not exist yet

        let mut out = vec![0.5f32; 128];
        assert!(!ctx.read_input(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));

        // Producer appears later; the lazy open picks it up mid-IO.
        let mut producer = RingProducer::new(&region);
        producer.open().unwrap();
        producer.write(&vec![0.25f32; 128]);

        assert!(ctx.read_input(&mut out));
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_stop_io_drops_the_mapping() {
        let dir = tempdir().unwrap();
        let region = dir.path().join("test.ring");
        let mut producer = RingProducer::new(&region);
        producer.open().unwrap();

        let mut ctx = DriverContext::new(&region);
        ctx.initialize();
        ctx.start_io();
        ctx.stop_io();

        producer.write(&[0.5; 32]);
        let mut out = vec![0.5f32; 32];
        assert!(!ctx.read_input(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_zero_timestamp_counts_whole_periods() {
        let dir = tempdir().unwrap();
        let mut ctx = DriverContext::new(&dir.path().join("test.ring"));
        assert!(ctx.zero_timestamp().is_none());

        ctx.initialize();
        ctx.start_io();
        let anchor = ctx.io_anchor.unwrap();

        let period = Duration::from_nanos(
            u64::from(ZERO_TIMESTAMP_PERIOD_FRAMES) * 1_000_000_000 / u64::from(RING_SAMPLE_RATE),
        );
        let ts = ctx.zero_timestamp_at(anchor + period * 3 + period / 2).unwrap();
        assert_eq!(ts.sample_time, f64::from(ZERO_TIMESTAMP_PERIOD_FRAMES) * 3.0);
        assert_eq!(ts.host_offset, period * 3);
        assert_eq!(ts.seed, 1);
    }

    #[test]
    fn test_running_state_reaches_property_protocol() {
        let dir = tempdir().unwrap();
        let mut ctx = DriverContext::new(&dir.path().join("test.ring"));
        ctx.initialize();
        assert_eq!(
            ctx.property(ObjectId::Device, Selector::DeviceIsRunning, Scope::Global),
            Ok(PropertyValue::Bool(false))
        );
        ctx.start_io();
        assert_eq!(
            ctx.property(ObjectId::Device, Selector::DeviceIsRunning, Scope::Global),
            Ok(PropertyValue::Bool(true))
        );
    }
}
