use crate::types::Tick;

pub trait TimeProvider {
    // Returns epoch nanoseconds used for timestamp freshness checks.
    fn now_nanos(&self) -> u64;

    // Returns coarse-grained epoch seconds used for tick arithmetic.
    fn now_coarse(&self) -> u32 {
        (self.now_nanos() / 1_000_000_000) as u32
    }

    fn current_tick(&self) -> Tick {
        Tick::from_secs(self.now_coarse() as u64)
    }
}

#[cfg(feature = "std")]
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "std")]
pub struct SystemTimeProvider;

#[cfg(feature = "std")]
impl TimeProvider for SystemTimeProvider {
    fn now_nanos(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// Fixed clock for tests and deterministic replay.
pub struct FixedTimeProvider(pub u64);

impl TimeProvider for FixedTimeProvider {
    fn now_nanos(&self) -> u64 {
        self.0
    }
}
