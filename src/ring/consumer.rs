//! Consumer (read) side of the shared ring buffer.
//!
//! Lives inside the virtual device driver, which is hosted by the OS audio
//! server in a different process from the producer. The consumer tolerates
//! the region not existing yet and re-probes lazily; starvation is answered
//! with silence, never with blocking or an error.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use memmap2::MmapMut;

use crate::ring::{RingHeader, REGION_BYTES, RING_CHANNELS, RING_FRAMES};

struct ConsumerMapping {
    map: MmapMut,
}

impl ConsumerMapping {
    fn header(&self) -> &RingHeader {
        // Safety: the mapping is at least REGION_BYTES (checked at open) and
        // the header occupies its first 64 bytes.
        unsafe { &*self.map.as_ptr().cast::<RingHeader>() }
    }

    fn data(&self) -> *const f32 {
        // Safety: data starts right after the header within the mapping.
        unsafe { self.map.as_ptr().add(crate::ring::HEADER_BYTES) }.cast::<f32>()
    }
}

/// Read side of the shared ring buffer region.
///
/// The mapping is writable only so `read_head` can be advanced; the consumer
/// never writes audio data and never touches `write_head` or `active`.
pub struct RingConsumer {
    path: PathBuf,
    state: Option<ConsumerMapping>,
}

impl RingConsumer {
    /// Creates an unmapped consumer for the given region path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: None,
        }
    }

    /// Creates an unmapped consumer for the default region path.
    pub fn at_default_path() -> Self {
        Self::new(crate::ring::DEFAULT_REGION_PATH)
    }

    /// Returns the region path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` while the region is mapped.
    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Attempts to map the region if it exists and is fully sized.
    ///
    /// Returns `true` once mapped. A missing or undersized file is not an
    /// error; the producer simply has not started yet and the caller retries
    /// on a later IO cycle. Allocation-free after the first successful map.
    pub fn try_open(&mut self) -> bool {
        if self.state.is_some() {
            return true;
        }

        let file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(_) => return false,
        };

        match file.metadata() {
            Ok(meta) if meta.len() >= REGION_BYTES as u64 => {}
            _ => return false,
        }

        // Safety: the file is at least REGION_BYTES; the mapping outlives
        // every pointer derived from it via ConsumerMapping.
        let map = match unsafe { MmapMut::map_mut(&file) } {
            Ok(map) => map,
            Err(_) => return false,
        };

        self.state = Some(ConsumerMapping { map });
        true
    }

    /// Returns `true` if a producer currently holds the region open.
    pub fn producer_active(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|mapping| mapping.header().active.load(Ordering::Acquire) == 1)
    }

    /// Frames currently buffered and unread.
    pub fn available_frames(&self) -> u64 {
        match &self.state {
            Some(mapping) => {
                let header = mapping.header();
                let write = header.write_head.load(Ordering::Acquire);
                let read = header.read_head.load(Ordering::Relaxed);
                write.saturating_sub(read)
            }
            None => 0,
        }
    }

    /// Fills `out` with interleaved stereo frames from the ring, or with
    /// silence when the region is unmapped, inactive, or holds fewer frames
    /// than requested.
    ///
    /// Returns `true` when real audio was copied. On success the read head is
    /// advanced with release ordering. Lock-free and allocation-free; safe to
    /// call on a hard real-time deadline.
    pub fn read_or_silence(&mut self, out: &mut [f32]) -> bool {
        let frames = (out.len() / RING_CHANNELS as usize) as u64;

        // Re-attempt mapping lazily; the producer may have appeared since
        // the last cycle.
        if !self.try_open() {
            out.fill(0.0);
            return false;
        }

        let mapping = match &self.state {
            Some(mapping) => mapping,
            None => {
                out.fill(0.0);
                return false;
            }
        };

        let header = mapping.header();
        if header.active.load(Ordering::Acquire) != 1 {
            out.fill(0.0);
            return false;
        }

        let write = header.write_head.load(Ordering::Acquire);
        let read = header.read_head.load(Ordering::Relaxed);
        if write.saturating_sub(read) < frames {
            out.fill(0.0);
            return false;
        }

        let data = mapping.data();
        let mut copied: u64 = 0;
        while copied < frames {
            let ring_index = ((read + copied) % RING_FRAMES) as usize;
            let contiguous = RING_FRAMES as usize - ring_index;
            let chunk = ((frames - copied) as usize).min(contiguous);

            // Safety: ring_index + chunk <= RING_FRAMES keeps the source in
            // the data region; the destination range is inside `out`.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    data.add(ring_index * RING_CHANNELS as usize),
                    out.as_mut_ptr()
                        .add(copied as usize * RING_CHANNELS as usize),
                    chunk * RING_CHANNELS as usize,
                );
            }
            copied += chunk as u64;
        }

        header.read_head.store(read + frames, Ordering::Release);
        true
    }

    /// Unmaps the region, if mapped.
    pub fn close(&mut self) {
        self.state = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingProducer;
    use tempfile::tempdir;

    #[test]
    fn test_missing_region_yields_silence() {
        let dir = tempdir().unwrap();
        let mut consumer = RingConsumer::new(dir.path().join("absent"));
        let mut out = [1.0_f32; 64];
        assert!(!consumer.read_or_silence(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(!consumer.is_open());
    }

    #[test]
    fn test_round_trip_no_wrap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region");
        let mut producer = RingProducer::new(&path);
        producer.open().unwrap();

        let frames: Vec<f32> = (0..256 * 2).map(|i| i as f32 / 1000.0).collect();
        producer.write(&frames);

        let mut consumer = RingConsumer::new(&path);
        let mut out = vec![0.0_f32; frames.len()];
        assert!(consumer.read_or_silence(&mut out));
        assert_eq!(out, frames);
        assert_eq!(consumer.available_frames(), 0);
    }

    #[test]
    fn test_round_trip_across_wrap_boundary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region");
        let mut producer = RingProducer::new(&path);
        producer.open().unwrap();
        let mut consumer = RingConsumer::new(&path);

        // Push the heads near the end of the ring, consuming as we go.
        let filler = vec![0.0_f32; 1000 * 2];
        let mut drained = vec![0.0_f32; filler.len()];
        for _ in 0..16 {
            producer.write(&filler);
            assert!(consumer.read_or_silence(&mut drained));
        }

        // 16000 frames in; the next 1000-frame block wraps at 16384.
        let marked: Vec<f32> = (0..1000 * 2).map(|i| (i % 97) as f32).collect();
        producer.write(&marked);
        let mut out = vec![0.0_f32; marked.len()];
        assert!(consumer.read_or_silence(&mut out));
        assert_eq!(out, marked);
    }

    #[test]
    fn test_starvation_is_silence_not_partial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region");
        let mut producer = RingProducer::new(&path);
        producer.open().unwrap();
        producer.write(&vec![0.7_f32; 100 * 2]);

        let mut consumer = RingConsumer::new(&path);
        let mut out = vec![1.0_f32; 200 * 2];
        assert!(!consumer.read_or_silence(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
        // The buffered frames stay for a later, smaller read.
        assert_eq!(consumer.available_frames(), 100);
    }

    #[test]
    fn test_closed_producer_yields_silence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region");
        let mut producer = RingProducer::new(&path);
        producer.open().unwrap();
        producer.write(&vec![0.3_f32; 64 * 2]);
        producer.close();

        let mut consumer = RingConsumer::new(&path);
        let mut out = vec![1.0_f32; 64 * 2];
        assert!(!consumer.read_or_silence(&mut out));
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(!consumer.producer_active());
    }
}
