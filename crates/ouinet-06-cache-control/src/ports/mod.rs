//! # Driven Ports
//!
//! The two collaborators `spec.md` §4.5 calls out explicitly: a stored-entry
//! reader/writer (the external content-addressed cache) and a fresh-fetch
//! path (whatever transport the request router selected).

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

use crate::domain::{CacheControlError, CacheEntry};

/// Reads and writes the external cache. `spec.md` §6: "Minimal interface:
/// `get(key) -> {timestamp, bytes}` and `put(key, bytes) -> content_id`."
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn fetch_stored(&self, request: &Request<Bytes>) -> Result<CacheEntry, CacheControlError>;

    /// Store `response` for `request`. Optional in principle (`spec.md`
    /// §4.5: "plus an optional `store`"), but every production collaborator
    /// implements it; callers should treat a failure here as non-fatal.
    async fn store(&self, request: &Request<Bytes>, response: &Response<Bytes>) -> Result<(), CacheControlError>;
}

/// Performs a fresh network fetch through whatever responder the request
/// router selected (injector, origin, ...).
#[async_trait]
pub trait FreshFetcher: Send + Sync {
    async fn fetch_fresh(&self, request: &Request<Bytes>) -> Result<Response<Bytes>, CacheControlError>;
}

/// Wall-clock seconds, injected so staleness tests use a fixed clock.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> u64;
}
