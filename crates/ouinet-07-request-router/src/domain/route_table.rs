//! First-match-wins route selection (`spec.md` §4.6 "Request routing").

use bytes::Bytes;
use http::Request;

use super::predicate::Predicate;
use super::request_config::RequestConfig;

/// One entry in a [`RouteTable`]: the first rule whose predicate matches
/// the request wins.
pub struct Rule {
    pub predicate: Predicate,
    pub config: RequestConfig,
}

impl Rule {
    pub fn new(predicate: Predicate, config: RequestConfig) -> Self {
        Self { predicate, config }
    }
}

/// The ordered rule list plus the precedence baked in ahead of it.
///
/// Grounded in `original_source/src/request_routing.cpp`'s
/// `get_next_mechanism`: a `localhost` Host always goes to the front-end,
/// a non-idempotent method always goes straight to the origin, and only
/// then does the configured rule list get a say.
pub struct RouteTable {
    rules: Vec<Rule>,
    default: RequestConfig,
}

impl RouteTable {
    pub fn new(rules: Vec<Rule>, default: RequestConfig) -> Self {
        Self { rules, default }
    }

    /// Selects the [`RequestConfig`] for `request`, applying the front-end
    /// and non-idempotent-method bypasses before consulting `rules`.
    pub fn select(&self, request: &Request<Bytes>) -> RequestConfig {
        if is_front_end_request(request) {
            return RequestConfig::front_end_only();
        }
        if !is_idempotent_method(request.method()) {
            return RequestConfig::origin_only();
        }
        for rule in &self.rules {
            if rule.predicate.eval(request) {
                return rule.config.clone();
            }
        }
        self.default.clone()
    }
}

/// `spec.md` §4.6: a request whose `Host` header names this node's own
/// loopback listener is destined for the front-end, regardless of target.
fn is_front_end_request(request: &Request<Bytes>) -> bool {
    request
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|host| host.starts_with("localhost") || host.starts_with("127.0.0.1"))
        .unwrap_or(false)
}

/// GET and HEAD are safe to serve from the cache or an injector; every
/// other method (POST, PUT, DELETE, CONNECT, ...) must reach the origin
/// directly so side effects aren't replayed or intercepted.
fn is_idempotent_method(method: &http::Method) -> bool {
    matches!(*method, http::Method::GET | http::Method::HEAD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::predicate::Extractor;
    use crate::domain::request_config::Responder;

    fn request(host: &str, method: http::Method, target: &str) -> Request<Bytes> {
        Request::builder()
            .method(method)
            .uri(target)
            .header(http::header::HOST, host)
            .body(Bytes::new())
            .unwrap()
    }

    fn cached_rule_table() -> RouteTable {
        let rule = Rule::new(
            Predicate::matches(Extractor::Host, "^example\\.net$").unwrap(),
            RequestConfig::new(true, [Responder::Injector, Responder::Origin]),
        );
        RouteTable::new(vec![rule], RequestConfig::new(false, [Responder::Origin]))
    }

    #[test]
    fn localhost_host_bypasses_to_front_end_even_if_a_rule_would_match() {
        let table = cached_rule_table();
        let config = table.select(&request("localhost:8077", http::Method::GET, "/status"));
        assert!(!config.enable_cache);
        assert_eq!(config.responders, std::collections::VecDeque::from([Responder::FrontEnd]));
    }

    #[test]
    fn post_bypasses_cache_and_goes_straight_to_origin() {
        let table = cached_rule_table();
        let config = table.select(&request("example.net", http::Method::POST, "/submit"));
        assert!(!config.enable_cache);
        assert_eq!(config.responders, std::collections::VecDeque::from([Responder::Origin]));
    }

    #[test]
    fn get_matching_a_rule_enables_the_cache() {
        let table = cached_rule_table();
        let config = table.select(&request("example.net", http::Method::GET, "/page"));
        assert!(config.enable_cache);
        assert_eq!(
            config.responders,
            std::collections::VecDeque::from([Responder::Injector, Responder::Origin])
        );
    }

    #[test]
    fn get_matching_no_rule_falls_through_to_the_default() {
        let table = cached_rule_table();
        let config = table.select(&request("unrelated.example", http::Method::GET, "/page"));
        assert!(!config.enable_cache);
        assert_eq!(config.responders, std::collections::VecDeque::from([Responder::Origin]));
    }
}
