//! Capture session lifecycle.
//!
//! The engine owns at most one live session and applies resolution changes
//! teardown-first: the old session is fully stopped (flag cleared, hardware
//! callback stopped, ring closed, default input restored) before anything for
//! the new device starts. A failed start leaves the engine idle with the ring
//! closed; the next resolution change triggers a fresh attempt.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::capture::converter::FormatConverter;
use crate::capture::{CaptureBackend, CaptureHandle, DefaultInputSelector};
use crate::error::CaptureError;
use crate::priority::ResolvedSelection;
use crate::ring::RingProducer;

/// Output scratch capacity in stereo frames per conversion pass.
const SCRATCH_FRAMES: usize = 2048;

/// Lifecycle state of the capture engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// No session; the ring is closed.
    Idle,
    /// A session is being set up.
    Configuring,
    /// A session is live and feeding the ring.
    Capturing,
}

struct ActiveSession {
    uid: String,
    /// Rendezvous with the audio callback: cleared with release ordering
    /// before hardware teardown so no callback write can land after the ring
    /// is zeroed and unmapped.
    active: Arc<AtomicBool>,
    handle: Box<dyn CaptureHandle>,
    producer: RingProducer,
    saved_default: Option<String>,
}

/// Owns the single capture session and the ring write side.
pub struct CaptureEngine {
    backend: Arc<dyn CaptureBackend>,
    default_input: Arc<dyn DefaultInputSelector>,
    region_path: PathBuf,
    virtual_uid: String,
    state: CaptureState,
    session: Option<ActiveSession>,
    /// Peak level of recent callback blocks, stored as f32 bits. The silence
    /// detector swaps this out on each poll.
    peak: Arc<AtomicU32>,
}

impl CaptureEngine {
    /// Creates an idle engine.
    ///
    /// `virtual_uid` is the uid claimed as system default input while a
    /// session is live.
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        default_input: Arc<dyn DefaultInputSelector>,
        region_path: &Path,
        virtual_uid: &str,
    ) -> Self {
        Self {
            backend,
            default_input,
            region_path: region_path.to_path_buf(),
            virtual_uid: virtual_uid.to_string(),
            state: CaptureState::Idle,
            session: None,
            peak: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// uid of the device being captured, if any.
    pub fn current_uid(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.uid.as_str())
    }

    /// Shared peak meter fed by the capture callback.
    pub fn peak_meter(&self) -> Arc<AtomicU32> {
        self.peak.clone()
    }

    /// Switches the engine to the given selection.
    ///
    /// `None` tears down any live session and leaves the engine idle. A
    /// selection matching the current session's uid is a no-op. Otherwise the
    /// old session is torn down first, then the new one is started.
    pub fn apply(&mut self, resolved: Option<&ResolvedSelection>) -> Result<(), CaptureError> {
        if let (Some(sel), Some(current)) = (resolved, self.current_uid()) {
            if sel.uid == current && self.state == CaptureState::Capturing {
                return Ok(());
            }
        }

        self.teardown();
        let Some(selection) = resolved else {
            return Ok(());
        };

        self.state = CaptureState::Configuring;
        match self.start_session(selection) {
            Ok(session) => {
                tracing::info!(uid = %session.uid, "capture session started");
                self.session = Some(session);
                self.state = CaptureState::Capturing;
                Ok(())
            }
            Err(error) => {
                tracing::warn!(uid = %selection.uid, %error, "capture start failed");
                self.state = CaptureState::Idle;
                Err(error)
            }
        }
    }

    fn start_session(&mut self, selection: &ResolvedSelection) -> Result<ActiveSession, CaptureError> {
        let mut producer = RingProducer::new(&self.region_path);
        producer.open()?;

        let close_on = |mut producer: RingProducer, error: CaptureError| {
            producer.close();
            error
        };

        let (native_rate, native_channels) = match self.backend.native_format(selection) {
            Ok(format) => format,
            Err(error) => return Err(close_on(producer, error)),
        };
        tracing::debug!(
            uid = %selection.uid,
            native_rate,
            native_channels,
            "configuring capture session"
        );

        let mut converter = FormatConverter::new(native_rate, native_channels);
        let Some(mut writer) = producer.writer() else {
            return Err(close_on(
                producer,
                CaptureError::BackendError("ring writer unavailable after open".to_string()),
            ));
        };

        let active = Arc::new(AtomicBool::new(false));
        let cb_active = active.clone();
        let peak = self.peak.clone();
        let mut scratch = vec![0.0f32; SCRATCH_FRAMES * 2];

        let callback = Box::new(move |input: &[f32]| {
            // First action on every invocation: during teardown this flag is
            // already clear, so the ring is never touched afterwards.
            if !cb_active.load(Ordering::Acquire) {
                return;
            }

            converter.push(input);
            loop {
                let frames = converter.produce(&mut scratch);
                if frames == 0 {
                    break;
                }
                writer.write(&scratch[..frames * 2]);
            }

            let mut block_peak = 0.0f32;
            for &sample in input {
                block_peak = block_peak.max(sample.abs());
            }
            // Keep the louder of pending and current so a poll between
            // callbacks cannot miss a loud block.
            let pending = f32::from_bits(peak.load(Ordering::Relaxed));
            if block_peak > pending {
                peak.store(block_peak.to_bits(), Ordering::Relaxed);
            }
        });

        // Publish the flag before the callback can run.
        active.store(true, Ordering::Release);
        let handle = match self.backend.start_capture(selection, callback) {
            Ok(handle) => handle,
            Err(error) => return Err(close_on(producer, error)),
        };

        let saved_default = self.default_input.current_default();
        if let Err(error) = self.default_input.set_default(&self.virtual_uid) {
            active.store(false, Ordering::Release);
            drop(handle);
            return Err(close_on(producer, error));
        }

        Ok(ActiveSession {
            uid: selection.uid.clone(),
            active,
            handle,
            producer,
            saved_default,
        })
    }

    /// Stops the live session, if any. Teardown order matters: flag, then
    /// hardware, then ring, then default input.
    pub fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.active.store(false, Ordering::Release);
            drop(session.handle);

            let mut producer = session.producer;
            producer.close();

            if let Some(previous) = session.saved_default {
                if let Err(error) = self.default_input.set_default(&previous) {
                    tracing::warn!(uid = %previous, %error, "failed to restore default input");
                }
            }
            tracing::info!(uid = %session.uid, "capture session stopped");
        }
        self.peak.store(0, Ordering::Relaxed);
        self.state = CaptureState::Idle;
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{MockCaptureBackend, MockDefaultInput};
    use crate::registry::TransportKind;
    use crate::ring::{RingConsumer, RING_FRAMES};
    use tempfile::tempdir;

    fn selection(uid: &str) -> ResolvedSelection {
        ResolvedSelection {
            uid: uid.to_string(),
            name: format!("{uid} name"),
            transport: TransportKind::Usb,
        }
    }

    fn engine_with(
        backend: &MockCaptureBackend,
        default_input: &MockDefaultInput,
        region: &Path,
    ) -> CaptureEngine {
        CaptureEngine::new(
            Arc::new(backend.clone()),
            Arc::new(default_input.clone()),
            region,
            "uid-virtual",
        )
    }

    #[test]
    fn test_apply_starts_and_claims_default() {
        let dir = tempdir().unwrap();
        let region = dir.path().join("test.ring");
        let backend = MockCaptureBackend::new();
        let default_input = MockDefaultInput::with_default("uid-previous");
        let mut engine = engine_with(&backend, &default_input, &region);

        engine.apply(Some(&selection("uid-a"))).unwrap();
        assert_eq!(engine.state(), CaptureState::Capturing);
        assert_eq!(engine.current_uid(), Some("uid-a"));
        assert_eq!(default_input.current_default().as_deref(), Some("uid-virtual"));
        assert!(region.exists());
    }

    #[test]
    fn test_apply_none_tears_down_and_restores_default() {
        let dir = tempdir().unwrap();
        let region = dir.path().join("test.ring");
        let backend = MockCaptureBackend::new();
        let default_input = MockDefaultInput::with_default("uid-previous");
        let mut engine = engine_with(&backend, &default_input, &region);

        engine.apply(Some(&selection("uid-a"))).unwrap();
        engine.apply(None).unwrap();

        assert_eq!(engine.state(), CaptureState::Idle);
        assert!(!backend.is_capturing());
        assert_eq!(default_input.current_default().as_deref(), Some("uid-previous"));
    }

    #[test]
    fn test_apply_same_uid_is_noop() {
        let dir = tempdir().unwrap();
        let region = dir.path().join("test.ring");
        let backend = MockCaptureBackend::new();
        let default_input = MockDefaultInput::default();
        let mut engine = engine_with(&backend, &default_input, &region);

        engine.apply(Some(&selection("uid-a"))).unwrap();
        engine.apply(Some(&selection("uid-a"))).unwrap();
        assert_eq!(backend.started(), vec!["uid-a".to_string()]);
        assert!(backend.stopped().is_empty());
    }

    #[test]
    fn test_switch_tears_down_before_starting() {
        let dir = tempdir().unwrap();
        let region = dir.path().join("test.ring");
        let backend = MockCaptureBackend::new();
        let default_input = MockDefaultInput::default();
        let mut engine = engine_with(&backend, &default_input, &region);

        engine.apply(Some(&selection("uid-a"))).unwrap();
        engine.apply(Some(&selection("uid-b"))).unwrap();

        assert_eq!(backend.stopped(), vec!["uid-a".to_string()]);
        assert_eq!(backend.started(), vec!["uid-a".to_string(), "uid-b".to_string()]);
        assert_eq!(engine.current_uid(), Some("uid-b"));
    }

    #[test]
    fn test_failed_start_leaves_engine_idle_and_ring_closed() {
        let dir = tempdir().unwrap();
        let region = dir.path().join("test.ring");
        let backend = MockCaptureBackend::new();
        backend.fail_for("uid-bad");
        let default_input = MockDefaultInput::default();
        let mut engine = engine_with(&backend, &default_input, &region);

        assert!(engine.apply(Some(&selection("uid-bad"))).is_err());
        assert_eq!(engine.state(), CaptureState::Idle);

        // The region file exists but is flagged inactive.
        let mut consumer = RingConsumer::new(&region);
        assert!(consumer.try_open());
        assert!(!consumer.producer_active());
    }

    #[test]
    fn test_fed_samples_reach_the_ring() {
        let dir = tempdir().unwrap();
        let region = dir.path().join("test.ring");
        let backend = MockCaptureBackend::new();
        let default_input = MockDefaultInput::default();
        let mut engine = engine_with(&backend, &default_input, &region);
        engine.apply(Some(&selection("uid-a"))).unwrap();

        let samples = vec![0.25f32; 960 * 2];
        assert!(backend.feed(&samples));

        let mut consumer = RingConsumer::new(&region);
        assert!(consumer.try_open());
        let mut out = vec![0.0f32; 960 * 2];
        assert!(consumer.read_or_silence(&mut out));
        assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_peak_meter_tracks_fed_audio() {
        let dir = tempdir().unwrap();
        let region = dir.path().join("test.ring");
        let backend = MockCaptureBackend::new();
        let default_input = MockDefaultInput::default();
        let mut engine = engine_with(&backend, &default_input, &region);
        engine.apply(Some(&selection("uid-a"))).unwrap();

        backend.feed(&[0.0, -0.7, 0.2, 0.1]);
        let peak = f32::from_bits(engine.peak_meter().load(Ordering::Relaxed));
        assert!((peak - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_teardown_zeroes_ring_before_unmap() {
        let dir = tempdir().unwrap();
        let region = dir.path().join("test.ring");
        let backend = MockCaptureBackend::new();
        let default_input = MockDefaultInput::default();
        let mut engine = engine_with(&backend, &default_input, &region);
        engine.apply(Some(&selection("uid-a"))).unwrap();
        backend.feed(&vec![0.9f32; RING_FRAMES as usize]);
        engine.apply(None).unwrap();

        let bytes = std::fs::read(&region).unwrap();
        assert!(bytes[crate::ring::HEADER_BYTES..].iter().all(|&b| b == 0));
    }
}
