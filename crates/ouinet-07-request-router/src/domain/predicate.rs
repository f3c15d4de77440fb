//! Boolean-algebra predicates over an incoming request, used by
//! [`RouteTable`][rt] to pick the first matching rule.
//!
//! [rt]: crate::domain::RouteTable

use bytes::Bytes;
use http::Request;
use regex::Regex;

/// A single field of the request a [`Predicate`] can inspect.
#[derive(Debug, Clone, Copy)]
pub enum Extractor {
    Method,
    Host,
    Target,
    Header(&'static str),
}

impl Extractor {
    fn extract(&self, request: &Request<Bytes>) -> String {
        match self {
            Extractor::Method => request.method().as_str().to_string(),
            Extractor::Host => request
                .headers()
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string(),
            Extractor::Target => request.uri().to_string(),
            Extractor::Header(name) => request
                .headers()
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string(),
        }
    }
}

/// A composable predicate over an incoming request (`spec.md` §4.6, "each
/// rule has a predicate and a responder queue").
pub enum Predicate {
    Matches(Extractor, Regex),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Always,
}

impl Predicate {
    pub fn matches(extractor: Extractor, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Predicate::Matches(extractor, Regex::new(pattern)?))
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn eval(&self, request: &Request<Bytes>) -> bool {
        match self {
            Predicate::Matches(extractor, regex) => regex.is_match(&extractor.extract(request)),
            Predicate::And(a, b) => a.eval(request) && b.eval(request),
            Predicate::Or(a, b) => a.eval(request) || b.eval(request),
            Predicate::Not(a) => !a.eval(request),
            Predicate::Always => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(host: &str, target: &str) -> Request<Bytes> {
        Request::builder()
            .uri(target)
            .header(http::header::HOST, host)
            .body(Bytes::new())
            .unwrap()
    }

    #[test]
    fn host_predicate_matches_exact_host() {
        let predicate = Predicate::matches(Extractor::Host, "^localhost(:\\d+)?$").unwrap();
        assert!(predicate.eval(&request("localhost:8077", "/status")));
        assert!(!predicate.eval(&request("example.net", "/status")));
    }

    #[test]
    fn and_requires_both_sides() {
        let by_host = Predicate::matches(Extractor::Host, "^example\\.net$").unwrap();
        let by_target = Predicate::matches(Extractor::Target, "^/api").unwrap();
        let combined = by_host.and(by_target);
        assert!(combined.eval(&request("example.net", "/api/v1")));
        assert!(!combined.eval(&request("example.net", "/other")));
    }

    #[test]
    fn not_inverts_the_inner_predicate() {
        let predicate = Predicate::matches(Extractor::Host, "^localhost$").unwrap().not();
        assert!(predicate.eval(&request("example.net", "/")));
        assert!(!predicate.eval(&request("localhost", "/")));
    }

    #[test]
    fn always_matches_everything() {
        assert!(Predicate::Always.eval(&request("anything", "/anything")));
    }
}
