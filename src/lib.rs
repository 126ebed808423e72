//! # automic
//!
//! Priority-based microphone routing through a shared-memory virtual input
//! device.
//!
//! `automic` remembers every microphone it sees, keeps them in a
//! user-ordered priority list, and continuously resolves the best connected
//! one. Audio from the winner is captured, converted to 48 kHz stereo f32,
//! and pushed through a lock-free shared-memory ring buffer to a virtual
//! input device hosted in the OS audio server's process, so applications
//! recording from the virtual mic always hear the best available hardware
//! without reconfiguring anything.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use automic::AutoMic;
//!
//! let engine = AutoMic::builder()
//!     .on_event(automic::event_callback(|e| tracing::info!(?e, "engine event")))
//!     .start()
//!     .await;
//!
//! // Pin the headset to the top of the list.
//! engine.move_entry("cpal:Elgato Wave:3", 0);
//!
//! // ... devices come and go; capture follows the list automatically.
//! engine.stop().await;
//! ```
//!
//! ## Architecture
//!
//! Three strict boundaries keep the hot path safe:
//!
//! - **Control plane**: a tokio task folds topology changes, user edits, and
//!   silence transitions into a pure resolution function, then starts and
//!   stops capture sessions to match.
//! - **Capture callback**: runs on the audio backend's real-time thread; it
//!   only converts formats and writes the ring, with no locks or allocation.
//! - **Driver process**: the virtual device maps the same ring read-only in
//!   spirit (it only advances the read head) and answers every starved or
//!   producer-less IO cycle with silence, never with an error.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod capture;
pub mod config;
pub mod driver;
mod engine;
mod error;
mod event;
pub mod priority;
pub mod registry;
pub mod ring;

pub use engine::{AutoMic, AutoMicBuilder, Engine};
pub use error::{CaptureError, ConfigError, PropertyError, RegistryError, RingError};
pub use event::{event_callback, EngineEvent, EventCallback};
pub use priority::{resolve, PriorityEntry, PriorityStore, ResolvedSelection};
pub use registry::{Device, DeviceRegistry, Topology, TransportKind};
