//! Tick-based time for the deterministic core.
//!
//! All timestamps are signed 64-bit counts of 100-ns intervals since the Unix
//! epoch. Time is captured once at the pipeline boundary and threaded through
//! explicitly; the deterministic components never read a wall clock.

use chrono::{DateTime, Utc};

pub type Ticks = i64;

/// 100-ns ticks per second.
pub const TICKS_PER_SECOND: Ticks = 10_000_000;

pub const TICKS_PER_MINUTE: Ticks = 60 * TICKS_PER_SECOND;

/// Convert a UTC instant to ticks.
pub fn ticks_from_datetime(instant: DateTime<Utc>) -> Ticks {
    let seconds = instant.timestamp();
    let sub_ticks = Ticks::from(instant.timestamp_subsec_nanos() / 100);
    seconds * TICKS_PER_SECOND + sub_ticks
}

/// Clock abstraction so the host decides when "now" is read. The core takes
/// ticks as explicit arguments everywhere else.
pub trait Clock: Send + Sync {
    fn now_ticks(&self) -> Ticks;
}

/// Wall-clock backed implementation for live use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ticks(&self) -> Ticks {
        ticks_from_datetime(Utc::now())
    }
}

/// Settable clock for tests and replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: std::sync::atomic::AtomicI64,
}

impl ManualClock {
    pub fn new(ticks: Ticks) -> Self {
        Self {
            ticks: std::sync::atomic::AtomicI64::new(ticks),
        }
    }

    pub fn set(&self, ticks: Ticks) {
        self.ticks.store(ticks, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance(&self, delta: Ticks) {
        self.ticks.fetch_add(delta, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ticks(&self) -> Ticks {
        self.ticks.load(std::sync::atomic::Ordering::SeqCst)
    }
}
