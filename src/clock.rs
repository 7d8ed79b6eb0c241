//! Monotonic clock abstraction.
//!
//! `AuBuf` and `Ajb` need a monotonic microsecond clock for arrival-timing
//! and cadence gating (§5, §8 of the design: "a monotonic microsecond
//! clock is assumed" / "monotonic clock controlled by the test"). Real
//! callers use [`SystemClock`]; tests drive scenarios deterministically
//! with [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A source of monotonic time in microseconds.
pub trait Clock: Send + Sync {
    /// Current time in microseconds since some fixed, arbitrary epoch.
    fn now_us(&self) -> u64;

    /// Current time in milliseconds. Default derives from [`Self::now_us`].
    fn now_ms(&self) -> u64 {
        self.now_us() / 1_000
    }
}

/// The real wall clock, pinned to an epoch captured at construction so
/// `now_us()` never returns zero (zero is used internally as a sentinel
/// for "unset").
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

/// A clock fully controlled by the caller, for deterministic tests.
#[derive(Default)]
pub struct ManualClock {
    us: AtomicU64,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            us: AtomicU64::new(start_us),
        }
    }

    pub fn set(&self, us: u64) {
        self.us.store(us, Ordering::Release);
    }

    pub fn advance(&self, delta_us: u64) {
        self.us.fetch_add(delta_us, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.us.load(Ordering::Acquire)
    }
}

impl<T: Clock + ?Sized> Clock for std::sync::Arc<T> {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}
