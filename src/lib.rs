//! Adaptive audio jitter buffer.
//!
//! Buffers arriving PCM frames, reorders them by timestamp, and drains
//! them back out at a fixed cadence. In adaptive mode an [`ajb::Ajb`]
//! tracks network jitter and buffered latency to decide when to stall a
//! tick or drop a frame's worth of audio to keep latency bounded.
//!
//! # Crate structure
//!
//! - [`audio`] - PCM sample formats and the frame descriptor types
//!   exchanged at the write/read boundary
//! - [`clock`] - the monotonic clock abstraction arrival timing is
//!   measured against
//! - [`config`] - construction-time tunables ([`config::AubufConfig`])
//! - [`ajb`] - the jitter/buffered-duration estimator
//! - [`aubuf`] - the frame buffer itself ([`aubuf::AuBuf`])

pub mod ajb;
pub mod aubuf;
pub mod audio;
pub mod clock;
pub mod config;
pub mod error;

pub use ajb::{Ajb, AjbState};
pub use aubuf::{AuBuf, AuBufStats};
pub use audio::{AudioFormat, AuFrameDescriptor, AuFrameOut};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuBufMode, AubufConfig};
pub use error::{AubufError, Result};
