//! Error taxonomy for the audio buffer and jitter estimator.
//!
//! All anomalies that are part of normal operation (overruns, underruns,
//! jitter state transitions) are *not* errors — they surface as state
//! changes the caller can observe through [`crate::aubuf::AuBuf::stats`]
//! and [`crate::aubuf::AuBuf::debug`]. This enum only covers the three
//! cases that abort an operation outright.

use thiserror::Error;

/// Errors returned by [`crate::aubuf::AuBuf`] operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AubufError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("out of memory")]
    OutOfMemory,

    #[error("timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, AubufError>;
