//! Error types for automic.
//!
//! Errors are split per concern so each layer reports exactly what it can
//! fail at. Nothing in the real-time audio paths returns these types; the
//! capture callback and the driver IO read communicate through status values
//! and silence instead (see `ring` and `driver`).

use std::path::PathBuf;

/// Errors from the shared-memory ring buffer producer and consumer.
///
/// The security-validation variants (`NotRegularFile`, `OwnerMismatch`) are
/// always fatal to the open attempt and never bypassed. Resource-acquisition
/// variants carry the underlying OS error.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// Opening the backing file failed.
    #[error("failed to open ring region {path}: {source}")]
    OpenFailed {
        /// Path of the backing file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Stat on the backing file failed.
    #[error("failed to stat ring region {path}: {source}")]
    StatFailed {
        /// Path of the backing file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The path names something other than a regular file (symlink,
    /// directory, fifo, ...).
    #[error("ring region {path} is not a regular file")]
    NotRegularFile {
        /// Path of the offending file.
        path: PathBuf,
    },

    /// The backing file is owned by a different user.
    #[error("ring region {path} owned by uid {owner}, expected uid {current}")]
    OwnerMismatch {
        /// Path of the offending file.
        path: PathBuf,
        /// The file's owner uid.
        owner: u32,
        /// The current process's uid.
        current: u32,
    },

    /// Enforcing the region size via truncate failed.
    #[error("failed to size ring region {path}: {source}")]
    ResizeFailed {
        /// Path of the backing file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Memory-mapping the region failed.
    #[error("failed to map ring region {path}: {source}")]
    MapFailed {
        /// Path of the backing file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The region on disk is smaller than the required layout.
    #[error("ring region {path} is {actual} bytes, expected {expected}")]
    RegionTooSmall {
        /// Path of the backing file.
        path: PathBuf,
        /// Size found on disk.
        actual: u64,
        /// Size the layout requires.
        expected: u64,
    },
}

impl RingError {
    /// Returns the underlying OS error code, where one applies.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Self::OpenFailed { source, .. }
            | Self::StatFailed { source, .. }
            | Self::ResizeFailed { source, .. }
            | Self::MapFailed { source, .. } => source.raw_os_error(),
            Self::NotRegularFile { .. }
            | Self::OwnerMismatch { .. }
            | Self::RegionTooSmall { .. } => None,
        }
    }
}

/// Errors from device enumeration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The audio host could not list input devices.
    #[error("device enumeration failed: {reason}")]
    EnumerationFailed {
        /// Description from the audio backend.
        reason: String,
    },
}

/// Errors from the capture engine.
///
/// Hardware-configuration failures abort the current start attempt and leave
/// the engine `Idle`; they are reported but not retried automatically. The
/// next topology or priority change triggers a fresh attempt.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The resolved device disappeared between resolution and open.
    #[error("capture device not found: {name}")]
    DeviceNotFound {
        /// Name of the missing device.
        name: String,
    },

    /// The device rejected the capture configuration.
    #[error("unsupported capture format: {format}")]
    UnsupportedFormat {
        /// The rejected format.
        format: String,
    },

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    BackendError(String),

    /// Opening the ring buffer write side failed.
    #[error("ring buffer error: {0}")]
    Ring(#[from] RingError),

    /// Claiming or restoring the system default input failed.
    #[error("default input selection failed: {reason}")]
    DefaultInputFailed {
        /// Description of the failure.
        reason: String,
    },
}

/// Errors from persisting the priority list.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading or writing the config file failed.
    #[error("config file error: {path}: {source}")]
    Io {
        /// Path to the config file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Serializing the entries failed.
    #[error("config serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from the virtual device property protocol.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PropertyError {
    /// The object does not have the requested property.
    #[error("unknown property {selector:?} on {object:?}")]
    UnknownProperty {
        /// Queried object.
        object: crate::driver::ObjectId,
        /// Queried selector.
        selector: crate::driver::Selector,
    },

    /// A settable property was given a value the device does not support.
    #[error("unsupported format for {selector:?}")]
    UnsupportedFormat {
        /// The selector that rejected the value.
        selector: crate::driver::Selector,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_mismatch_display() {
        let err = RingError::OwnerMismatch {
            path: PathBuf::from("/tmp/automic.ring"),
            owner: 0,
            current: 501,
        };
        assert_eq!(
            err.to_string(),
            "ring region /tmp/automic.ring owned by uid 0, expected uid 501"
        );
        assert_eq!(err.os_error(), None);
    }

    #[test]
    fn test_ring_error_carries_source() {
        let io = std::io::Error::from_raw_os_error(13);
        let err = RingError::OpenFailed {
            path: PathBuf::from("/tmp/automic.ring"),
            source: io,
        };
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.os_error(), Some(13));
    }

    #[test]
    fn test_capture_error_from_ring() {
        let err = CaptureError::from(RingError::NotRegularFile {
            path: PathBuf::from("/tmp/x"),
        });
        assert!(err.to_string().contains("not a regular file"));
    }
}
