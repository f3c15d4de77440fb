//! # Driven Ports
//!
//! Interfaces this crate requires from its host: datagram I/O and wall-clock
//! time, so the domain and service layers stay deterministic and testable.

use std::net::SocketAddr;

use async_trait::async_trait;
use ouinet_02_multiplexer::MultiplexerError;

/// Datagram transport the DHT node runs its protocol over.
#[async_trait]
pub trait NetworkPort: Send + Sync {
    async fn send(&self, datagram: &[u8], peer: SocketAddr) -> Result<(), MultiplexerError>;
    async fn receive(&self) -> Result<(Vec<u8>, SocketAddr), MultiplexerError>;
    fn local_addr(&self) -> Result<SocketAddr, MultiplexerError>;
}

/// Wall-clock seconds, injected so tests can use a fixed clock instead of
/// the system one.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> u64;
}
