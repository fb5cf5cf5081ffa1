use crate::types::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of "now" for commands entering a partition.
///
/// Processing itself never reads the clock: processors use the timestamp of
/// the command being processed, so replays are deterministic.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct ControlledClock {
    now: AtomicI64,
}

impl ControlledClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn advance(&self, by: Duration) -> Timestamp {
        let delta = by.as_millis() as i64;
        self.now.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ControlledClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
