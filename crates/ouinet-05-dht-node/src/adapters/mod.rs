//! Concrete adapters for the [`crate::ports`] traits.

use std::net::SocketAddr;

use async_trait::async_trait;
use ouinet_02_multiplexer::{Multiplexer, MultiplexerError};

use crate::ports::{NetworkPort, TimeSource};

/// [`NetworkPort`] backed by a real bound UDP socket.
#[derive(Clone)]
pub struct MultiplexerNetwork(Multiplexer);

impl MultiplexerNetwork {
    pub fn new(multiplexer: Multiplexer) -> Self {
        Self(multiplexer)
    }
}

#[async_trait]
impl NetworkPort for MultiplexerNetwork {
    async fn send(&self, datagram: &[u8], peer: SocketAddr) -> Result<(), MultiplexerError> {
        self.0.send(datagram, peer).await
    }

    async fn receive(&self) -> Result<(Vec<u8>, SocketAddr), MultiplexerError> {
        self.0.receive().await
    }

    fn local_addr(&self) -> Result<SocketAddr, MultiplexerError> {
        self.0.local_addr()
    }
}

/// [`TimeSource`] backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// A fixed clock for deterministic tests (`spec.md`'s ambient test-tooling
/// expectation: see `SPEC_FULL.md` "Test tooling").
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource(pub u64);

impl TimeSource for FixedTimeSource {
    fn now(&self) -> u64 {
        self.0
    }
}
