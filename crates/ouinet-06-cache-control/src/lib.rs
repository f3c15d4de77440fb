//! The cache-control layer: decides, per request, whether to serve a stored
//! response or go fetch a fresh one, and when to refresh the store.
//!
//! Reference: `spec.md` §4.5 "Cache-Control".

pub mod domain;
pub mod ports;
pub mod service;

pub use domain::{filter_before_store, ok_to_cache, CacheEntry, CacheControlError};
pub use ports::{CacheStore, FreshFetcher, TimeSource};
pub use service::CacheControl;
