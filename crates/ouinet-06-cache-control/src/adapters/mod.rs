//! Concrete adapters for [`crate::ports::TimeSource`]. `CacheStore` and
//! `FreshFetcher` are implemented by `ouinet-client`, which owns the actual
//! cache backend and transport clients.

use crate::ports::TimeSource;

/// [`TimeSource`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// A fixed clock for deterministic staleness tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource(pub u64);

impl TimeSource for FixedTimeSource {
    fn now(&self) -> u64 {
        self.0
    }
}
