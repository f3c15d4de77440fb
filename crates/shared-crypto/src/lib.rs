//! # Shared Crypto
//!
//! Ed25519 signing, used to authenticate BEP 44 mutable DHT items.
//!
//! ## Security Properties
//!
//! - **Ed25519**: Deterministic nonces, no RNG dependency

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod signatures;

// Re-exports
pub use errors::CryptoError;
pub use signatures::{Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
