//! Audio data types shared by the jitter estimator and the frame buffer.
//!
//! - [`format::AudioFormat`] - PCM sample format and its pure helpers
//! - [`frame::AuFrameDescriptor`] / [`frame::AuFrameOut`] - the passive
//!   descriptor records exchanged at the writer/reader boundary

pub mod format;
pub mod frame;

pub use format::{AudioFormat, frame_level_dbov, sample_size};
pub use frame::{AUDIO_TIMEBASE, AuFrameDescriptor, AuFrameOut, frame_byte_size};
