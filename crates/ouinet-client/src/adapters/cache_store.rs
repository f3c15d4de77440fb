//! A minimal in-memory stand-in for the content-addressed cache backend.
//!
//! `spec.md` §1 lists "the content-addressed storage backend used as the
//! 'cache'" as an external collaborator, out of scope for this repo. This
//! adapter exists only so [`ouinet_06_cache_control::CacheControl`] has a
//! real [`CacheStore`] to drive end to end; swap it for a client of the
//! real backend without touching `ouinet-06-cache-control` or the router.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use ouinet_06_cache_control::{CacheControlError, CacheEntry, CacheStore, TimeSource};

#[derive(Clone)]
pub struct InMemoryCacheStore {
    entries: std::sync::Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn key(request: &Request<Bytes>) -> String {
        format!("{} {}", request.method(), request.uri())
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn fetch_stored(&self, request: &Request<Bytes>) -> Result<CacheEntry, CacheControlError> {
        self.entries
            .lock()
            .unwrap()
            .get(&Self::key(request))
            .cloned()
            .ok_or(CacheControlError::StoredMiss)
    }

    async fn store(&self, request: &Request<Bytes>, response: &Response<Bytes>) -> Result<(), CacheControlError> {
        let entry = CacheEntry::new(SystemClock.now(), response.clone());
        self.entries.lock().unwrap().insert(Self::key(request), entry);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock is after the epoch")
            .as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request<Bytes> {
        Request::builder().uri("http://example.net/x").body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn stores_then_fetches_the_same_entry() {
        let store = InMemoryCacheStore::new();
        assert!(store.fetch_stored(&request()).await.is_err());

        let response = Response::builder().status(200).body(Bytes::from("hi")).unwrap();
        store.store(&request(), &response).await.unwrap();

        let fetched = store.fetch_stored(&request()).await.unwrap();
        assert_eq!(fetched.response.body(), &Bytes::from("hi"));
    }
}
