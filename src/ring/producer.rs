//! Producer (write) side of the shared ring buffer.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use memmap2::MmapMut;

use crate::error::RingError;
use crate::ring::{
    RingHeader, BYTES_PER_FRAME, DATA_BYTES, REGION_BYTES, RING_CHANNELS, RING_FRAMES,
    RING_SAMPLE_RATE,
};

/// A mapped producer-side region.
///
/// The raw pointers are derived from the mapping at open time and stay valid
/// for as long as the mapping lives; the `Arc` around this struct guarantees
/// that. Writing audio data through `data` from a single thread while the
/// consumer process reads is the SPSC contract of the region.
struct RingMapping {
    map: MmapMut,
    header: *const RingHeader,
    data: *mut f32,
}

// Safety: the mapping is plain process memory; the header is only accessed
// through atomics and the data pointer is only written by the single producer
// thread (enforced by `RingWriter` being the sole write handle).
unsafe impl Send for RingMapping {}
unsafe impl Sync for RingMapping {}

impl RingMapping {
    fn header(&self) -> &RingHeader {
        // Safety: `header` points at the first 64 bytes of the live mapping.
        unsafe { &*self.header }
    }

    /// Copies `frames` interleaved frames into the ring and publishes the new
    /// write head with release ordering.
    ///
    /// Wraps across the ring boundary in at most two contiguous copies. Never
    /// blocks, never allocates, never locks. Single-producer contract: only
    /// one thread may call this at a time.
    fn write(&self, interleaved: &[f32]) {
        let frames = (interleaved.len() / RING_CHANNELS as usize) as u64;
        if frames == 0 {
            return;
        }

        let head = self.header().write_head.load(Ordering::Relaxed);
        let mut written: u64 = 0;
        while written < frames {
            let ring_index = ((head + written) % RING_FRAMES) as usize;
            let contiguous = RING_FRAMES as usize - ring_index;
            let chunk = ((frames - written) as usize).min(contiguous);

            // Safety: ring_index + chunk <= RING_FRAMES, so the destination
            // stays inside the data portion of the mapping; source range is
            // inside the input slice by construction.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    interleaved
                        .as_ptr()
                        .add(written as usize * RING_CHANNELS as usize),
                    self.data.add(ring_index * RING_CHANNELS as usize),
                    chunk * RING_CHANNELS as usize,
                );
            }
            written += chunk as u64;
        }

        // Release so the consumer observes fully written frames before the
        // advanced head.
        self.header()
            .write_head
            .store(head + frames, Ordering::Release);
    }

    /// Zeroes the entire audio data region.
    fn zero_data(&self) {
        // Safety: the data pointer spans exactly DATA_BYTES of the mapping.
        unsafe {
            std::ptr::write_bytes(self.data.cast::<u8>(), 0, DATA_BYTES);
        }
    }
}

/// Write side of the shared ring buffer region.
///
/// Owns the backing file's lifecycle: `open` creates, validates, sizes, maps
/// and initializes the region; `close` marks it inactive, zeroes the audio
/// data and unmaps; `unlink` removes it from the filesystem.
pub struct RingProducer {
    path: PathBuf,
    shared: Option<Arc<RingMapping>>,
}

impl RingProducer {
    /// Creates an unopened producer for the given region path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            shared: None,
        }
    }

    /// Creates an unopened producer for the default region path.
    pub fn at_default_path() -> Self {
        Self::new(crate::ring::DEFAULT_REGION_PATH)
    }

    /// Returns the region path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` while the region is open and mapped.
    pub fn is_open(&self) -> bool {
        self.shared.is_some()
    }

    /// Creates-or-reuses the backing file, validates it, maps it read-write
    /// and initializes the header with `active = 1`.
    ///
    /// Validation refuses symlinks, non-regular files and files owned by
    /// another user; these checks are never bypassed. Idempotent: opening an
    /// already-open producer is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the [`RingError`] variant for the step that failed; no partial
    /// state is kept on failure.
    pub fn open(&mut self) -> Result<(), RingError> {
        if self.shared.is_some() {
            return Ok(());
        }

        let file = self.open_validated()?;

        file.set_len(REGION_BYTES as u64)
            .map_err(|source| RingError::ResizeFailed {
                path: self.path.clone(),
                source,
            })?;

        // Safety: the file is sized to REGION_BYTES and stays open for the
        // lifetime of the mapping.
        let mut map = unsafe {
            MmapMut::map_mut(&file).map_err(|source| RingError::MapFailed {
                path: self.path.clone(),
                source,
            })?
        };

        let base = map.as_mut_ptr();
        map.as_mut().fill(0);

        let header = base.cast::<RingHeader>();
        // Safety: the mapping is not shared with any other handle yet, so
        // plain writes to the format fields are unobservable until `active`
        // is published below.
        unsafe {
            (*header).sample_rate = RING_SAMPLE_RATE;
            (*header).channels = RING_CHANNELS;
            (*header).write_head.store(0, Ordering::Relaxed);
            (*header).read_head.store(0, Ordering::Relaxed);
            (*header).active.store(1, Ordering::Release);
        }

        let data = unsafe { base.add(super::HEADER_BYTES) }.cast::<f32>();
        self.shared = Some(Arc::new(RingMapping {
            map,
            header: header.cast_const(),
            data,
        }));

        tracing::info!(path = %self.path.display(), "ring region opened for writing");
        Ok(())
    }

    /// Opens the backing file with the strict safety checks applied both
    /// before and after the open (the post-open stat closes the race between
    /// check and use).
    fn open_validated(&self) -> Result<File, RingError> {
        #[cfg(unix)]
        use std::os::unix::fs::{MetadataExt, OpenOptionsExt};

        match std::fs::symlink_metadata(&self.path) {
            Ok(meta) if !meta.file_type().is_file() => {
                return Err(RingError::NotRegularFile {
                    path: self.path.clone(),
                });
            }
            Ok(_) => {}
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(RingError::StatFailed {
                    path: self.path.clone(),
                    source,
                });
            }
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        options
            .mode(0o600)
            .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC);

        let file = options.open(&self.path).map_err(|source| {
            // O_NOFOLLOW surfaces a symlink as ELOOP; report it as the
            // security violation it is rather than a generic open failure.
            if source.raw_os_error() == Some(libc::ELOOP) {
                RingError::NotRegularFile {
                    path: self.path.clone(),
                }
            } else {
                RingError::OpenFailed {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;

        let meta = file.metadata().map_err(|source| RingError::StatFailed {
            path: self.path.clone(),
            source,
        })?;
        if !meta.file_type().is_file() {
            return Err(RingError::NotRegularFile {
                path: self.path.clone(),
            });
        }

        #[cfg(unix)]
        {
            // Safety: getuid is always safe to call.
            let current = unsafe { libc::getuid() };
            if meta.uid() != current {
                return Err(RingError::OwnerMismatch {
                    path: self.path.clone(),
                    owner: meta.uid(),
                    current,
                });
            }
        }

        Ok(file)
    }

    /// Returns a real-time write handle, or `None` if the region is not open.
    ///
    /// Exactly one writer may be live at a time; the handle is intended to be
    /// moved into the audio callback.
    pub fn writer(&self) -> Option<RingWriter> {
        self.shared.as_ref().map(|shared| RingWriter {
            shared: Arc::clone(shared),
        })
    }

    /// Convenience write for callers that own the producer directly.
    ///
    /// Same contract as [`RingWriter::write`].
    pub fn write(&mut self, interleaved: &[f32]) {
        if let Some(shared) = &self.shared {
            shared.write(interleaved);
        }
    }

    /// Frames currently buffered and unread.
    pub fn buffered_frames(&self) -> u64 {
        match &self.shared {
            Some(shared) => {
                let header = shared.header();
                header
                    .write_head
                    .load(Ordering::Relaxed)
                    .saturating_sub(header.read_head.load(Ordering::Relaxed))
            }
            None => 0,
        }
    }

    /// Marks the region inactive, zeroes the entire audio data area, flushes
    /// and unmaps.
    ///
    /// Zeroing defends against leaking residual audio to any observer that
    /// maps the file before it is unlinked. The caller must have stopped the
    /// audio callback (dropped its [`RingWriter`]) before calling this.
    pub fn close(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.header().active.store(0, Ordering::Release);
            shared.zero_data();
            if let Err(error) = shared.map.flush() {
                tracing::warn!(path = %self.path.display(), %error, "ring region flush failed");
            }
            tracing::info!(path = %self.path.display(), "ring region closed");
        }
    }

    /// Removes the backing file from the filesystem namespace.
    ///
    /// Safe to call even if the region was never opened.
    pub fn unlink(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "ring region unlinked"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "ring region unlink failed");
            }
        }
    }
}

impl Drop for RingProducer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Real-time write handle for the audio callback.
///
/// Holding this keeps the mapping alive. `write` never blocks, never
/// allocates and never locks, which is the contract required inside a
/// real-time audio callback.
pub struct RingWriter {
    shared: Arc<RingMapping>,
}

impl RingWriter {
    /// Copies interleaved stereo frames into the ring and publishes the new
    /// write head. See [`RingProducer::open`] for the layout.
    pub fn write(&mut self, interleaved: &[f32]) {
        self.shared.write(interleaved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut producer = RingProducer::new(dir.path().join("region"));
        producer.open().unwrap();
        producer.open().unwrap();
        assert!(producer.is_open());
    }

    #[test]
    fn test_open_refuses_directory() {
        let dir = tempdir().unwrap();
        let mut producer = RingProducer::new(dir.path());
        match producer.open() {
            Err(RingError::NotRegularFile { .. }) => {}
            other => panic!("expected NotRegularFile, got {other:?}"),
        }
        assert!(!producer.is_open());
    }

    #[cfg(unix)]
    #[test]
    fn test_open_refuses_symlink() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"x").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let mut producer = RingProducer::new(&link);
        match producer.open() {
            Err(RingError::NotRegularFile { .. }) => {}
            other => panic!("expected NotRegularFile, got {other:?}"),
        }
        assert!(!producer.is_open());
    }

    #[test]
    fn test_region_sized_and_initialized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region");
        let mut producer = RingProducer::new(&path);
        producer.open().unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), REGION_BYTES as u64);
        assert_eq!(producer.buffered_frames(), 0);
    }

    #[test]
    fn test_close_zeroes_data_region() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region");
        let mut producer = RingProducer::new(&path);
        producer.open().unwrap();
        producer.write(&[0.5_f32; 512 * 2]);
        producer.close();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes[crate::ring::HEADER_BYTES..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unlink_without_open_is_safe() {
        let dir = tempdir().unwrap();
        let producer = RingProducer::new(dir.path().join("never-created"));
        producer.unlink();
    }

    #[test]
    fn test_write_advances_head_across_wrap() {
        let dir = tempdir().unwrap();
        let mut producer = RingProducer::new(dir.path().join("region"));
        producer.open().unwrap();

        let block = vec![0.25_f32; 1000 * BYTES_PER_FRAME / 4];
        let frames_per_block = (block.len() / RING_CHANNELS as usize) as u64;
        let blocks = RING_FRAMES / frames_per_block + 2;
        for _ in 0..blocks {
            producer.write(&block);
        }
        assert_eq!(producer.buffered_frames(), blocks * frames_per_block);
    }
}
