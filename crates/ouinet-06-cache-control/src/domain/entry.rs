//! A stored response and the timestamp it was captured at.
//!
//! Reference: `spec.md` §3 "CacheEntry".

use bytes::Bytes;
use http::Response;

/// `{ timestamp, HTTP response }`, produced by the cache read path and
/// discarded when older than `max_cached_age` (`spec.md` §3).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Absolute wall-clock seconds the response was stored at.
    pub timestamp: u64,
    pub response: Response<Bytes>,
}

impl CacheEntry {
    pub fn new(timestamp: u64, response: Response<Bytes>) -> Self {
        Self { timestamp, response }
    }

    /// Seconds elapsed between `timestamp` and `now`; saturates at zero for
    /// a clock that appears to have gone backwards.
    pub fn age(&self, now: u64) -> u64 {
        now.saturating_sub(self.timestamp)
    }

    /// Whether this entry is within `max_cached_age` of `now`
    /// (`spec.md` §4.5 step 2).
    pub fn is_fresh(&self, now: u64, max_cached_age: u64) -> bool {
        self.age(now) <= max_cached_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(timestamp: u64) -> CacheEntry {
        CacheEntry::new(timestamp, Response::new(Bytes::new()))
    }

    #[test]
    fn fresh_within_the_bound() {
        let e = entry(1_000);
        assert!(e.is_fresh(1_000 + 3600, 604_800));
    }

    #[test]
    fn stale_past_the_bound() {
        let e = entry(0);
        assert!(!e.is_fresh(604_801, 604_800));
    }

    #[test]
    fn age_never_goes_negative_across_a_backwards_clock() {
        let e = entry(1_000);
        assert_eq!(e.age(500), 0);
    }
}
