//! What may be stored, and in what shape.
//!
//! Reference: `spec.md` §4.5: "`filter_before_store` strips hop-by-hop
//! headers and non-cacheable fields; `ok_to_cache` rejects responses with
//! negative cache directives, set-cookie, etc., reporting the reason for
//! logging."

use bytes::Bytes;
use http::{HeaderName, Response};

/// RFC 7230 §6.1 hop-by-hop headers: meaningful only for a single
/// transport hop, never valid to replay from a cached copy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Strip hop-by-hop headers (and any header a `Connection` header names)
/// from a response before it is handed to [`crate::ports::CacheStore::store`].
pub fn filter_before_store(mut response: Response<Bytes>) -> Response<Bytes> {
    let connection_named: Vec<String> = response
        .headers()
        .get(http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').map(|s| s.trim().to_ascii_lowercase()).collect())
        .unwrap_or_default();

    let headers = response.headers_mut();
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    for name in connection_named {
        if let Ok(header) = HeaderName::try_from(name) {
            headers.remove(header);
        }
    }
    response
}

/// Whether `response` is eligible to be stored at all, or the reason it
/// isn't (for the caller to log; `spec.md` §4.5).
pub fn ok_to_cache(response: &Response<Bytes>) -> Result<(), &'static str> {
    if response.headers().contains_key(http::header::SET_COOKIE) {
        return Err("response carries Set-Cookie");
    }
    if let Some(cache_control) = response
        .headers()
        .get(http::header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
    {
        let lowered = cache_control.to_ascii_lowercase();
        if lowered.contains("no-store") || lowered.contains("private") {
            return Err("response carries a negative cache directive");
        }
    }
    if response.headers().contains_key(http::header::WWW_AUTHENTICATE) {
        return Err("response carries WWW-Authenticate");
    }
    if !matches!(response.status().as_u16(), 200..=299) {
        return Err("response status is not 2xx");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(header: (&str, &str)) -> Response<Bytes> {
        let mut builder = Response::builder().status(200);
        builder = builder.header(header.0, header.1);
        builder.body(Bytes::new()).unwrap()
    }

    #[test]
    fn strips_hop_by_hop_headers() {
        let response = response_with(("Transfer-Encoding", "chunked"));
        let filtered = filter_before_store(response);
        assert!(!filtered.headers().contains_key("transfer-encoding"));
    }

    #[test]
    fn strips_headers_named_by_connection() {
        let mut response = Response::builder()
            .status(200)
            .header("Connection", "X-Custom")
            .header("X-Custom", "secret")
            .body(Bytes::new())
            .unwrap();
        response = filter_before_store(response);
        assert!(!response.headers().contains_key("x-custom"));
    }

    #[test]
    fn rejects_set_cookie() {
        let response = response_with(("Set-Cookie", "session=abc"));
        assert!(ok_to_cache(&response).is_err());
    }

    #[test]
    fn rejects_no_store() {
        let response = response_with(("Cache-Control", "no-store"));
        assert!(ok_to_cache(&response).is_err());
    }

    #[test]
    fn accepts_a_plain_200() {
        let response = Response::builder().status(200).body(Bytes::new()).unwrap();
        assert!(ok_to_cache(&response).is_ok());
    }

    #[test]
    fn rejects_non_2xx_status() {
        let response = Response::builder().status(404).body(Bytes::new()).unwrap();
        assert!(ok_to_cache(&response).is_err());
    }
}
