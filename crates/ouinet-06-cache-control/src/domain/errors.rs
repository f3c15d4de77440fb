//! Cache-control error taxonomy.
//!
//! Reference: `spec.md` §7: "the cache-control layer treats 'stored miss'
//! and 'fresh fail' as orthogonal: both may occur without being fatal."

/// Errors `fetch_stored`/`fetch_fresh`/`store` can report to
/// [`crate::service::CacheControl`]. Neither a stored miss nor a fresh
/// failure is fatal on its own; `CacheControl::fetch` only surfaces an
/// error when both paths are exhausted.
#[derive(thiserror::Error, Debug)]
pub enum CacheControlError {
    #[error("no stored entry for this request")]
    StoredMiss,
    #[error("fresh fetch failed: {0}")]
    FreshFetchFailed(String),
    #[error("store failed: {0}")]
    StoreFailed(String),
}
