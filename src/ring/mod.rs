//! Shared-memory SPSC ring buffer for cross-process audio transport.
//!
//! One process (the capture engine) writes interleaved f32 frames; a second,
//! independent process (the virtual device driver, hosted by the OS audio
//! server) reads them on a hard real-time deadline. The two sides share a
//! fixed-size memory-mapped file:
//!
//! ```text
//! [ RingHeader (64 bytes) ][ 16384 frames of interleaved f32 stereo ]
//! ```
//!
//! `write_head` and `read_head` are monotonically increasing frame counters
//! that never reset; the storage offset is `head % RING_FRAMES`. The producer
//! publishes `write_head` with release ordering and only ever reads
//! `read_head`; the consumer advances `read_head` and only ever reads
//! `write_head`. No other synchronization exists between the processes.

mod consumer;
mod producer;

pub use consumer::RingConsumer;
pub use producer::{RingProducer, RingWriter};

use std::sync::atomic::{AtomicU32, AtomicU64};

/// Ring capacity in frames (~341 ms at 48 kHz).
pub const RING_FRAMES: u64 = 16384;

/// Channel count of the transported audio (stereo).
pub const RING_CHANNELS: u32 = 2;

/// Sample rate of the transported audio.
pub const RING_SAMPLE_RATE: u32 = 48_000;

/// Bytes per interleaved stereo f32 frame.
pub const BYTES_PER_FRAME: usize = RING_CHANNELS as usize * std::mem::size_of::<f32>();

/// Size of the region header in bytes.
pub const HEADER_BYTES: usize = 64;

/// Size of the audio data portion in bytes.
pub const DATA_BYTES: usize = RING_FRAMES as usize * BYTES_PER_FRAME;

/// Total size of the mapped region in bytes.
pub const REGION_BYTES: usize = HEADER_BYTES + DATA_BYTES;

/// Default filesystem path of the shared region.
pub const DEFAULT_REGION_PATH: &str = "/tmp/automic.ring";

/// Header at offset 0 of the shared region.
///
/// Only the first three fields are written after initialization: the heads by
/// their respective sides, `active` by the producer on open/close. The format
/// fields are written once by the producer before `active` is published.
#[repr(C)]
pub struct RingHeader {
    /// Next frame index the producer will write.
    pub write_head: AtomicU64,
    /// Next frame index the consumer will read.
    pub read_head: AtomicU64,
    /// 1 while a producer holds the region open.
    pub active: AtomicU32,
    /// Negotiated sample rate.
    pub sample_rate: u32,
    /// Negotiated channel count.
    pub channels: u32,
    _pad: [u32; 9],
}

// The header must occupy exactly the space the layout reserves for it.
const _: () = assert!(std::mem::size_of::<RingHeader>() == HEADER_BYTES);
