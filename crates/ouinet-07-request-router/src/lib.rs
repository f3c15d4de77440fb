//! Per-request route selection, `CONNECT` tunneling, and the HTTP proxy
//! server loop (`spec.md` §4.6, §4.7).
//!
//! Layout mirrors the other `ouinet-0N` crates: `domain` holds the pure
//! routing and relay logic, `ports` names the collaborators the router asks
//! for a response, `adapters` turns a matched responder queue into the
//! `ouinet-06-cache-control::FreshFetcher` that crate expects, and
//! `service` is the runnable accept loop.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use domain::{Extractor, Predicate, RequestConfig, Responder, RouteTable, RouterError, Rule};
pub use ports::{FrontEnd, InjectorClient, OriginClient, ProxyClient, TunnelStream};
pub use service::ProxyServer;
