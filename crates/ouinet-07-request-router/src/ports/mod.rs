//! Trait seams the router depends on: the three fetch-capable responders
//! plus the front-end handler (`spec.md` §4.6 "responder queue").

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use tokio::io::{AsyncRead, AsyncWrite};

/// A byte stream suitable for relaying a `CONNECT` tunnel onto.
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> TunnelStream for T {}

/// Fetches a request directly from the origin server it names.
#[async_trait]
pub trait OriginClient: Send + Sync {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String>;

    /// Opens a raw byte stream to `authority` for `CONNECT` tunneling.
    async fn connect(&self, authority: &str) -> Result<Box<dyn TunnelStream>, String>;
}

/// Forwards a request through a configured upstream HTTP proxy.
#[async_trait]
pub trait ProxyClient: Send + Sync {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String>;
}

/// Forwards a request to a trusted injector, which fetches on our behalf.
#[async_trait]
pub trait InjectorClient: Send + Sync {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String>;

    /// Opens a raw byte stream to the injector itself for `CONNECT`
    /// tunneling (`spec.md` §6: the transport client's `connect()` yields
    /// "one stream per request or per `CONNECT`"). `authority` is the
    /// ultimate tunnel target; the caller writes the `CONNECT` request
    /// naming it through the returned stream once it is open.
    async fn connect(&self, authority: &str) -> Result<Box<dyn TunnelStream>, String>;
}

/// This node's own front-end: status pages and the local HTTP API.
#[async_trait]
pub trait FrontEnd: Send + Sync {
    async fn handle(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String>;
}

// Blanket impls so a shared `Arc<dyn Trait>` can stand in for an owned
// collaborator wherever these traits are asked for (the server loop holds
// one instance of each client and hands out clones of the `Arc` per request).

#[async_trait]
impl OriginClient for std::sync::Arc<dyn OriginClient> {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String> {
        (**self).fetch(request).await
    }

    async fn connect(&self, authority: &str) -> Result<Box<dyn TunnelStream>, String> {
        (**self).connect(authority).await
    }
}

#[async_trait]
impl ProxyClient for std::sync::Arc<dyn ProxyClient> {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String> {
        (**self).fetch(request).await
    }
}

#[async_trait]
impl InjectorClient for std::sync::Arc<dyn InjectorClient> {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String> {
        (**self).fetch(request).await
    }

    async fn connect(&self, authority: &str) -> Result<Box<dyn TunnelStream>, String> {
        (**self).connect(authority).await
    }
}

#[async_trait]
impl FrontEnd for std::sync::Arc<dyn FrontEnd> {
    async fn handle(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String> {
        (**self).handle(request).await
    }
}
