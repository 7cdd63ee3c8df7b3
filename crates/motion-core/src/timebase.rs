use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of monotonic microsecond timestamps shared by pulses and deadlines.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> u64;
}

/// Monotonic clock anchored at construction.
#[derive(Debug, Clone, Copy)]
pub struct TimeBase {
    start: Instant,
}

impl TimeBase {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TimeBase {
    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

/// Clock that only moves when told to. Used for replays and tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now_us: AtomicU64::new(start_us),
        }
    }

    pub fn set_us(&self, now_us: u64) {
        self.now_us.store(now_us, Ordering::Release);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_us.fetch_add(ms * 1_000, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::Acquire)
    }
}
