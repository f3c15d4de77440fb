//! What a matched route tells the server loop to do with a request.
//!
//! Reference: `spec.md` §4.6 "Request routing" — each rule produces a
//! `RequestConfig` naming whether the distributed cache may be consulted and,
//! if the cache misses or is disabled, the ordered queue of responders to try.

use std::collections::VecDeque;

/// A source the router can ask to actually produce a response, tried in
/// order until one succeeds (`spec.md` §4.6 "responder queue").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Responder {
    /// Fetch directly from the origin server named by the request.
    Origin,
    /// Forward through a configured upstream HTTP proxy.
    Proxy,
    /// Forward to a trusted injector, which fetches on our behalf and signs
    /// the response for distribution through the cache.
    Injector,
    /// Serve from this node's own front-end (status pages, local API).
    FrontEnd,
}

/// The outcome of matching a request against the [`RouteTable`][rt].
///
/// [rt]: crate::domain::RouteTable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestConfig {
    /// Whether the distributed cache may be consulted before falling
    /// through to `responders`.
    pub enable_cache: bool,
    /// Ordered responders to try when the cache is disabled, empty, or
    /// stale and fetching fresh is necessary.
    pub responders: VecDeque<Responder>,
}

impl RequestConfig {
    pub fn new(enable_cache: bool, responders: impl IntoIterator<Item = Responder>) -> Self {
        Self {
            enable_cache,
            responders: responders.into_iter().collect(),
        }
    }

    /// The front-end bypass: no cache, front-end only (`spec.md` §4.6,
    /// "a request whose Host is the client's own `localhost` endpoint is
    /// answered by the front-end and never reaches the cache or injector").
    pub fn front_end_only() -> Self {
        Self::new(false, [Responder::FrontEnd])
    }

    /// The non-idempotent-method bypass: no cache, origin only (`spec.md`
    /// §4.6, grounded in `request_routing.cpp`'s `get_next_mechanism`:
    /// non-GET/HEAD methods never traverse the cache or injector).
    pub fn origin_only() -> Self {
        Self::new(false, [Responder::Origin])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_end_only_disables_cache() {
        let config = RequestConfig::front_end_only();
        assert!(!config.enable_cache);
        assert_eq!(config.responders, VecDeque::from([Responder::FrontEnd]));
    }

    #[test]
    fn origin_only_disables_cache() {
        let config = RequestConfig::origin_only();
        assert!(!config.enable_cache);
        assert_eq!(config.responders, VecDeque::from([Responder::Origin]));
    }
}
