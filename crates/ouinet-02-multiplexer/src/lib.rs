//! # UDP Multiplexer
//!
//! One bound UDP socket shared by every DHT coroutine. Datagrams are never
//! split or merged: `receive` always presents a datagram whole, and `send`
//! serializes concurrent callers onto the same socket.
//!
//! Reference: `spec.md` §4.1.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Largest datagram this multiplexer will hand to the kernel or accept from
/// it. DHT messages are bencoded dicts well under the common 1,280-byte safe
/// MTU floor; this is a generous ceiling against malformed or hostile peers.
pub const MAX_DATAGRAM_LEN: usize = 4096;

/// Failure of an individual send or receive. The socket itself survives any
/// single failure (`spec.md` §4.1): callers retry or give up independently.
#[derive(thiserror::Error, Debug)]
pub enum MultiplexerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datagram of {len} bytes exceeds the {max} byte limit")]
    DatagramTooLarge { len: usize, max: usize },
}

/// A bound UDP socket, wrapped so that concurrent senders serialize onto it
/// while a single owner drives `receive` in a loop.
///
/// Cloning shares the same underlying socket: every clone can call `send`,
/// but `receive` should only ever be driven from one place, matching the
/// "one receive loop" rule in `spec.md` §4.1.
#[derive(Clone)]
pub struct Multiplexer {
    socket: Arc<UdpSocket>,
    send_lock: Arc<Mutex<()>>,
}

impl Multiplexer {
    /// Bind a fresh socket to `local_addr` (use `0.0.0.0:0` or `[::]:0` for
    /// an ephemeral port on a given address family).
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, MultiplexerError> {
        let socket = UdpSocket::bind(local_addr).await?;
        Ok(Self::from_socket(socket))
    }

    /// Wrap an already-bound socket, e.g. one obtained from a privileged
    /// helper or test harness.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            send_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The address this multiplexer is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, MultiplexerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Send one datagram whole. Concurrent calls are serialized so that two
    /// messages can never interleave on the wire.
    pub async fn send(&self, datagram: &[u8], peer: SocketAddr) -> Result<(), MultiplexerError> {
        if datagram.len() > MAX_DATAGRAM_LEN {
            return Err(MultiplexerError::DatagramTooLarge {
                len: datagram.len(),
                max: MAX_DATAGRAM_LEN,
            });
        }
        let _guard = self.send_lock.lock().await;
        let sent = self.socket.send_to(datagram, peer).await?;
        debug_assert_eq!(sent, datagram.len(), "UDP send must be message-granular");
        Ok(())
    }

    /// Receive one whole datagram and the peer it came from. Only one task
    /// should ever be awaiting `receive` at a time; the DHT Node service
    /// drives this from a single loop and fans the result out internally.
    pub async fn receive(&self) -> Result<(Vec<u8>, SocketAddr), MultiplexerError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let (len, peer) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn send_and_receive_round_trip_a_whole_datagram() {
        let a = Multiplexer::bind(loopback(0)).await.unwrap();
        let b = Multiplexer::bind(loopback(0)).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send(b"ping-payload", b_addr).await.unwrap();
        let (datagram, from) = b.receive().await.unwrap();

        assert_eq!(datagram, b"ping-payload");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn oversized_datagram_is_rejected_without_touching_the_socket() {
        let a = Multiplexer::bind(loopback(0)).await.unwrap();
        let oversized = vec![0u8; MAX_DATAGRAM_LEN + 1];
        let err = a.send(&oversized, loopback(1)).await.unwrap_err();
        assert!(matches!(err, MultiplexerError::DatagramTooLarge { .. }));
    }

    #[tokio::test]
    async fn concurrent_sends_are_serialized_and_both_arrive_whole() {
        let a = Multiplexer::bind(loopback(0)).await.unwrap();
        let b = Multiplexer::bind(loopback(0)).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        let a2 = a.clone();
        let (r1, r2) = tokio::join!(
            a.send(&[1u8; 100], b_addr),
            a2.send(&[2u8; 100], b_addr)
        );
        r1.unwrap();
        r2.unwrap();

        let (first, _) = b.receive().await.unwrap();
        let (second, _) = b.receive().await.unwrap();
        assert_eq!(first.len(), 100);
        assert_eq!(second.len(), 100);
        assert!(first.iter().all(|&x| x == first[0]));
        assert!(second.iter().all(|&x| x == second[0]));
    }
}
