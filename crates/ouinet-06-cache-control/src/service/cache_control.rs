//! The public `fetch` policy.
//!
//! Reference: `spec.md` §4.5 "Cache-Control"; §8 testable property 8
//! "Cache-control idempotence".

use bytes::Bytes;
use http::{Request, Response};

use crate::domain::{filter_before_store, ok_to_cache, CacheControlError};
use crate::ports::{CacheStore, FreshFetcher, TimeSource};

/// Default `max_cached_age`: seven days (`spec.md` §6 CLI flag
/// `--max-cached-age`, default 604800 seconds).
pub const DEFAULT_MAX_CACHED_AGE_SECS: u64 = 7 * 24 * 60 * 60;

/// Wires a [`CacheStore`], a [`FreshFetcher`], and a clock into the policy
/// from `spec.md` §4.5. One instance is shared across every request that
/// enables caching.
pub struct CacheControl<C, F, T> {
    store: C,
    fetcher: F,
    time: T,
    max_cached_age: u64,
}

impl<C, F, T> CacheControl<C, F, T>
where
    C: CacheStore,
    F: FreshFetcher,
    T: TimeSource,
{
    pub fn new(store: C, fetcher: F, time: T, max_cached_age: u64) -> Self {
        Self {
            store,
            fetcher,
            time,
            max_cached_age,
        }
    }

    /// The public entry point. `enable_cache` comes from the matched
    /// request's [`RequestConfig`][rc] and gates whether the stored path is
    /// even attempted.
    ///
    /// [rc]: https://docs.rs/ouinet-07-request-router (`RequestConfig`)
    pub async fn fetch(
        &self,
        request: &Request<Bytes>,
        enable_cache: bool,
    ) -> Result<Response<Bytes>, CacheControlError> {
        if !enable_cache {
            return self.fetch_fresh_and_store(request).await;
        }

        let stored = self.store.fetch_stored(request).await;
        let stored = match stored {
            Ok(entry) => entry,
            Err(_) => return self.fetch_fresh_and_store(request).await,
        };

        if stored.is_fresh(self.time.now(), self.max_cached_age) {
            return Ok(stored.response);
        }

        match self.fetch_fresh_and_store(request).await {
            Ok(response) => Ok(response),
            // Stale-if-error: serve what we have rather than surface the
            // fetch failure (`spec.md` §4.5 step 3).
            Err(_) => Ok(stored.response),
        }
    }

    async fn fetch_fresh_and_store(
        &self,
        request: &Request<Bytes>,
    ) -> Result<Response<Bytes>, CacheControlError> {
        let response = self.fetcher.fetch_fresh(request).await?;
        if let Err(reason) = ok_to_cache(&response) {
            tracing::debug!(reason, "response not eligible for storage");
            return Ok(response);
        }
        let (parts, body) = response.into_parts();
        let filtered = filter_before_store(Response::from_parts(parts, body));
        if let Err(err) = self.store.store(request, &filtered).await {
            tracing::warn!(%err, "failed to store a fresh response");
        }
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FixedTimeSource;
    use crate::domain::CacheEntry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockStore {
        entry: Option<CacheEntry>,
        store_calls: AtomicUsize,
    }

    fn entry_at(timestamp: u64, body: &str) -> CacheEntry {
        CacheEntry::new(timestamp, Response::builder().status(200).body(Bytes::from(body.to_string())).unwrap())
    }

    #[async_trait]
    impl CacheStore for MockStore {
        async fn fetch_stored(&self, _request: &Request<Bytes>) -> Result<CacheEntry, CacheControlError> {
            self.entry.clone().ok_or(CacheControlError::StoredMiss)
        }

        async fn store(&self, _request: &Request<Bytes>, _response: &Response<Bytes>) -> Result<(), CacheControlError> {
            self.store_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockFetcher {
        calls: AtomicUsize,
        result: Mutex<Option<Result<Response<Bytes>, CacheControlError>>>,
    }

    #[async_trait]
    impl FreshFetcher for MockFetcher {
        async fn fetch_fresh(&self, _request: &Request<Bytes>) -> Result<Response<Bytes>, CacheControlError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.result.lock().unwrap().take() {
                Some(result) => result,
                None => Err(CacheControlError::FreshFetchFailed("no canned result".into())),
            }
        }
    }

    fn request() -> Request<Bytes> {
        Request::builder().uri("http://example.net/x").body(Bytes::new()).unwrap()
    }

    /// `spec.md` §8 testable property 8, first half: a fresh stored entry
    /// must never trigger `fetch_fresh` (scenario S5).
    #[tokio::test]
    async fn fresh_stored_entry_short_circuits_fetch_fresh() {
        let store = MockStore {
            entry: Some(entry_at(0, "stored")),
            store_calls: AtomicUsize::new(0),
        };
        let fetcher = MockFetcher {
            calls: AtomicUsize::new(0),
            result: Mutex::new(None),
        };
        let cc = CacheControl::new(store, fetcher, FixedTimeSource(3600), DEFAULT_MAX_CACHED_AGE_SECS);

        let response = cc.fetch(&request(), true).await.unwrap();
        assert_eq!(response.body(), &Bytes::from("stored"));
        assert_eq!(cc.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    /// Second half: once stale, a successful fresh fetch replaces the
    /// stored entry before the response is returned.
    #[tokio::test]
    async fn stale_entry_is_replaced_by_a_successful_fresh_fetch() {
        let store = MockStore {
            entry: Some(entry_at(0, "stale")),
            store_calls: AtomicUsize::new(0),
        };
        let fresh = Response::builder().status(200).body(Bytes::from("fresh")).unwrap();
        let fetcher = MockFetcher {
            calls: AtomicUsize::new(0),
            result: Mutex::new(Some(Ok(fresh))),
        };
        let cc = CacheControl::new(
            store,
            fetcher,
            FixedTimeSource(DEFAULT_MAX_CACHED_AGE_SECS + 1),
            DEFAULT_MAX_CACHED_AGE_SECS,
        );

        let response = cc.fetch(&request(), true).await.unwrap();
        assert_eq!(response.body(), &Bytes::from("fresh"));
        assert_eq!(cc.store.store_calls.load(Ordering::SeqCst), 1);
    }

    /// Stale-if-error: a failed fresh fetch falls back to the stale entry.
    #[tokio::test]
    async fn stale_entry_survives_a_failed_fresh_fetch() {
        let store = MockStore {
            entry: Some(entry_at(0, "stale")),
            store_calls: AtomicUsize::new(0),
        };
        let fetcher = MockFetcher {
            calls: AtomicUsize::new(0),
            result: Mutex::new(Some(Err(CacheControlError::FreshFetchFailed("down".into())))),
        };
        let cc = CacheControl::new(
            store,
            fetcher,
            FixedTimeSource(DEFAULT_MAX_CACHED_AGE_SECS + 1),
            DEFAULT_MAX_CACHED_AGE_SECS,
        );

        let response = cc.fetch(&request(), true).await.unwrap();
        assert_eq!(response.body(), &Bytes::from("stale"));
    }

    #[tokio::test]
    async fn a_stored_miss_falls_straight_through_to_fresh() {
        let store = MockStore {
            entry: None,
            store_calls: AtomicUsize::new(0),
        };
        let fresh = Response::builder().status(200).body(Bytes::from("fresh")).unwrap();
        let fetcher = MockFetcher {
            calls: AtomicUsize::new(0),
            result: Mutex::new(Some(Ok(fresh))),
        };
        let cc = CacheControl::new(store, fetcher, FixedTimeSource(0), DEFAULT_MAX_CACHED_AGE_SECS);

        let response = cc.fetch(&request(), true).await.unwrap();
        assert_eq!(response.body(), &Bytes::from("fresh"));
    }

    #[tokio::test]
    async fn cache_disabled_always_goes_fresh_even_with_a_fresh_stored_entry() {
        let store = MockStore {
            entry: Some(entry_at(0, "stored")),
            store_calls: AtomicUsize::new(0),
        };
        let fresh = Response::builder().status(200).body(Bytes::from("fresh")).unwrap();
        let fetcher = MockFetcher {
            calls: AtomicUsize::new(0),
            result: Mutex::new(Some(Ok(fresh))),
        };
        let cc = CacheControl::new(store, fetcher, FixedTimeSource(0), DEFAULT_MAX_CACHED_AGE_SECS);

        let response = cc.fetch(&request(), false).await.unwrap();
        assert_eq!(response.body(), &Bytes::from("fresh"));
    }
}
