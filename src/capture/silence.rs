//! Silence detection on the live capture session.
//!
//! The capture callback publishes block peaks into a shared meter; the
//! detector polls it from the control loop and flags the device silent once
//! the peak has stayed below the threshold for a full window. Each poll swaps
//! the meter back to zero, so a device that stops delivering callbacks
//! entirely also reads as silent.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State change reported by a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceTransition {
    /// The device has delivered nothing above the threshold for the window.
    BecameSilent,
    /// Audio above the threshold returned.
    BecameAudible,
}

/// Watches a peak meter and reports silence transitions.
pub struct SilenceDetector {
    peak: Arc<AtomicU32>,
    threshold: f32,
    window: Duration,
    below_since: Option<Instant>,
    silent: bool,
}

impl SilenceDetector {
    /// Peak amplitude below which a block counts as silent.
    pub const DEFAULT_THRESHOLD: f32 = 0.001;

    /// How long peaks must stay below the threshold before flagging.
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

    /// Recommended poll cadence.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Creates a detector over the given peak meter.
    pub fn new(peak: Arc<AtomicU32>, threshold: f32, window: Duration) -> Self {
        Self {
            peak,
            threshold,
            window,
            below_since: None,
            silent: false,
        }
    }

    /// Creates a detector with the default threshold and window.
    pub fn with_defaults(peak: Arc<AtomicU32>) -> Self {
        Self::new(peak, Self::DEFAULT_THRESHOLD, Self::DEFAULT_WINDOW)
    }

    /// Returns `true` while the device is flagged silent.
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Clears all state; call when the monitored session changes.
    pub fn reset(&mut self) {
        self.peak.store(0, Ordering::Relaxed);
        self.below_since = None;
        self.silent = false;
    }

    /// Samples the meter and reports a transition, if one happened.
    pub fn poll(&mut self) -> Option<SilenceTransition> {
        self.poll_at(Instant::now())
    }

    fn poll_at(&mut self, now: Instant) -> Option<SilenceTransition> {
        let peak = f32::from_bits(self.peak.swap(0, Ordering::Relaxed));

        if peak >= self.threshold {
            self.below_since = None;
            if self.silent {
                self.silent = false;
                return Some(SilenceTransition::BecameAudible);
            }
            return None;
        }

        let since = *self.below_since.get_or_insert(now);
        if !self.silent && now.duration_since(since) >= self.window {
            self.silent = true;
            return Some(SilenceTransition::BecameSilent);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> (Arc<AtomicU32>, SilenceDetector) {
        let peak = Arc::new(AtomicU32::new(0));
        let det = SilenceDetector::new(peak.clone(), 0.001, Duration::from_secs(10));
        (peak, det)
    }

    fn feed(peak: &AtomicU32, value: f32) {
        peak.store(value.to_bits(), Ordering::Relaxed);
    }

    #[test]
    fn test_flags_silent_only_after_full_window() {
        let (_, mut det) = detector();
        let t0 = Instant::now();

        assert_eq!(det.poll_at(t0), None);
        assert_eq!(det.poll_at(t0 + Duration::from_secs(9)), None);
        assert_eq!(
            det.poll_at(t0 + Duration::from_secs(10)),
            Some(SilenceTransition::BecameSilent)
        );
        assert!(det.is_silent());
        // No repeated transition while still silent.
        assert_eq!(det.poll_at(t0 + Duration::from_secs(11)), None);
    }

    #[test]
    fn test_audio_resets_the_window() {
        let (peak, mut det) = detector();
        let t0 = Instant::now();

        assert_eq!(det.poll_at(t0), None);
        feed(&peak, 0.5);
        assert_eq!(det.poll_at(t0 + Duration::from_secs(9)), None);
        // Window restarts from the loud poll.
        assert_eq!(det.poll_at(t0 + Duration::from_secs(18)), None);
        assert_eq!(
            det.poll_at(t0 + Duration::from_secs(19)),
            Some(SilenceTransition::BecameSilent)
        );
    }

    #[test]
    fn test_audible_transition_after_silence() {
        let (peak, mut det) = detector();
        let t0 = Instant::now();

        det.poll_at(t0);
        det.poll_at(t0 + Duration::from_secs(10));
        assert!(det.is_silent());

        feed(&peak, 0.2);
        assert_eq!(
            det.poll_at(t0 + Duration::from_secs(11)),
            Some(SilenceTransition::BecameAudible)
        );
        assert!(!det.is_silent());
    }

    #[test]
    fn test_peak_at_threshold_counts_as_audible() {
        let (peak, mut det) = detector();
        let t0 = Instant::now();
        feed(&peak, 0.001);
        assert_eq!(det.poll_at(t0), None);
        assert!(det.below_since.is_none());
    }

    #[test]
    fn test_poll_consumes_the_meter() {
        let (peak, mut det) = detector();
        feed(&peak, 0.5);
        det.poll_at(Instant::now());
        assert_eq!(peak.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_reset_clears_state() {
        let (peak, mut det) = detector();
        let t0 = Instant::now();
        det.poll_at(t0);
        det.poll_at(t0 + Duration::from_secs(10));
        assert!(det.is_silent());

        feed(&peak, 0.9);
        det.reset();
        assert!(!det.is_silent());
        assert_eq!(peak.load(Ordering::Relaxed), 0);
    }
}
