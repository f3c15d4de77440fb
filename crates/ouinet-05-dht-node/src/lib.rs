//! The BitTorrent mainline DHT node: routing table maintenance, peer
//! tracking, and BEP 44 storage, wired onto a UDP multiplexer.
//!
//! Reference: `spec.md` §4.4 "DHT Node".

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use domain::DhtError;
pub use ports::{NetworkPort, TimeSource};
pub use service::DhtNode;
