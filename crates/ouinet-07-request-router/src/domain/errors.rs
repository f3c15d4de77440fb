//! Typed errors for request routing, responder dispatch, and tunneling.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no route matched and no default responder queue is configured")]
    NoRoute,

    #[error("responder queue exhausted: every configured responder failed")]
    ResponderQueueExhausted,

    #[error("origin fetch failed: {0}")]
    OriginFailed(String),

    #[error("proxy fetch failed: {0}")]
    ProxyFailed(String),

    #[error("injector fetch failed: {0}")]
    InjectorFailed(String),

    #[error("front-end handler failed: {0}")]
    FrontEndFailed(String),

    #[error("cache policy failed: {0}")]
    CacheFailed(#[from] ouinet_06_cache_control::CacheControlError),

    #[error("CONNECT target is not a valid authority: {0}")]
    BadConnectTarget(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] http::Error),
}
