//! DHT error taxonomy.
//!
//! Reference: `spec.md` §7 "Error handling design". The five abstract kinds
//! there (Transient transport, Protocol, Policy, Resource, Fatal) map onto
//! these variants; callers match on the kind they need, not the name.

/// BEP 5 / BEP 44 wire error codes.
pub mod code {
    pub const GENERIC: i64 = 201;
    pub const SERVER: i64 = 202;
    pub const PROTOCOL: i64 = 203;
    pub const METHOD_UNKNOWN: i64 = 204;
    pub const INVALID_SIGNATURE: i64 = 206;
    pub const SEQ_TOO_LOW: i64 = 302;
}

#[derive(thiserror::Error, Debug)]
pub enum DhtError {
    /// Transient transport: retried within the search driver, surfaced only
    /// once the candidate queue drains.
    #[error("operation timed out")]
    Timeout,
    #[error("I/O error: {0}")]
    Io(#[from] ouinet_02_multiplexer::MultiplexerError),

    /// Protocol: dropped silently at the receive loop; recorded as a
    /// failure for the sending contact in the routing table.
    #[error("malformed message: {0}")]
    Protocol(String),

    /// Policy: answered with a typed error message.
    #[error("query is not this node's responsibility")]
    NotResponsible,
    #[error("incorrect announce token")]
    BadToken,
    #[error("method not implemented: {0}")]
    MethodNotImplemented(String),
    #[error("sequence number too low")]
    SeqTooLow,
    #[error("signature verification failed")]
    BadSignature,
    #[error("immutable value does not match its key")]
    ValueKeyMismatch,

    /// Resource: bubbled to the HTTP client as 502/504 by higher layers.
    #[error("node is not initialized; bootstrap has not completed")]
    NotInitialized,

    /// A component-level shutdown in progress; outstanding waiters observe
    /// this instead of their own timeout (`spec.md` §5 "Cancellation").
    #[error("operation aborted")]
    Aborted,
}

impl DhtError {
    /// The wire error this should be reported to a remote peer as, if any
    /// (some variants, like `Protocol`, are never reported — they're
    /// dropped silently per `spec.md` §7).
    pub fn as_wire_error(&self) -> Option<(i64, &'static str)> {
        match self {
            DhtError::NotResponsible => Some((code::GENERIC, "not responsible for this infohash")),
            DhtError::BadToken => Some((code::PROTOCOL, "incorrect announce token")),
            DhtError::MethodNotImplemented(_) => Some((code::METHOD_UNKNOWN, "method unknown")),
            DhtError::SeqTooLow => Some((code::SEQ_TOO_LOW, "sequence number less than current")),
            DhtError::BadSignature => Some((code::INVALID_SIGNATURE, "invalid signature")),
            DhtError::ValueKeyMismatch => Some((code::GENERIC, "value does not match key")),
            _ => None,
        }
    }
}
