//! The HTTP proxy server loop: accepts connections, routes each request
//! through the [`RouteTable`], fetches through [`CacheControl`], and
//! relays `CONNECT` tunnels through the injector transport.
//!
//! Reference: `spec.md` §4.6 "Request routing", §4.7 "CONNECT tunneling",
//! §9 "local accept loop".

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use ouinet_06_cache_control::{CacheControl, CacheStore, TimeSource};
use tokio::net::TcpListener;

use crate::adapters::ResponderChain;
use crate::domain::RouteTable;
use crate::ports::{FrontEnd, InjectorClient, OriginClient, ProxyClient};

/// Wires a [`RouteTable`], a cache store/clock, and the four responder
/// collaborators into a runnable accept loop.
pub struct ProxyServer<S, T> {
    route_table: Arc<RouteTable>,
    cache_store: S,
    time: T,
    max_cached_age: u64,
    origin: Arc<dyn OriginClient>,
    proxy: Arc<dyn ProxyClient>,
    injector: Arc<dyn InjectorClient>,
    front_end: Arc<dyn FrontEnd>,
}

impl<S, T> ProxyServer<S, T>
where
    S: CacheStore + Clone + Send + Sync + 'static,
    T: TimeSource + Clone + Send + Sync + 'static,
{
    pub fn new(
        route_table: RouteTable,
        cache_store: S,
        time: T,
        max_cached_age: u64,
        origin: Arc<dyn OriginClient>,
        proxy: Arc<dyn ProxyClient>,
        injector: Arc<dyn InjectorClient>,
        front_end: Arc<dyn FrontEnd>,
    ) -> Self {
        Self {
            route_table: Arc::new(route_table),
            cache_store,
            time,
            max_cached_age,
            origin,
            proxy,
            injector,
            front_end,
        }
    }

    /// Accepts connections on `listener` until `shutdown` resolves. Each
    /// connection is served on its own task; a connection error never
    /// takes down the loop.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = &mut shutdown => {
                    tracing::info!("proxy accept loop shutting down");
                    return;
                }
            };
            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(%err, "failed to accept a connection");
                    continue;
                }
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<Incoming>| {
                    let this = Arc::clone(&this);
                    async move { this.handle(req).await }
                });
                if let Err(err) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    tracing::debug!(%peer, %err, "connection closed with an error");
                }
            });
        }
    }

    async fn handle(
        self: &Arc<Self>,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        if req.method() == http::Method::CONNECT {
            return Ok(self.handle_connect(req).await);
        }

        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                tracing::debug!(%err, "failed to read request body");
                return Ok(bad_gateway());
            }
        };
        let request = Request::from_parts(parts, body);

        match self.dispatch(request).await {
            Ok(response) => {
                let (parts, body) = response.into_parts();
                Ok(Response::from_parts(parts, Full::new(body)))
            }
            Err(err) => {
                tracing::debug!(%err, "request dispatch failed");
                Ok(bad_gateway())
            }
        }
    }

    async fn dispatch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, crate::domain::RouterError> {
        let config = self.route_table.select(&request);
        let chain = ResponderChain::new(
            config.responders,
            Arc::clone(&self.origin),
            Arc::clone(&self.proxy),
            Arc::clone(&self.injector),
            Arc::clone(&self.front_end),
        );
        let cache = CacheControl::new(self.cache_store.clone(), chain, self.time.clone(), self.max_cached_age);
        Ok(cache.fetch(&request, config.enable_cache).await?)
    }

    /// `spec.md` §4.6/S6: open an injector channel, write the `CONNECT`
    /// request through it, read the response, and only enter the
    /// full-duplex relay on a 2xx status; otherwise the injector's status
    /// is surfaced to the client and no tunnel is established.
    async fn handle_connect(self: &Arc<Self>, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let authority = match req.uri().authority() {
            Some(authority) => authority.to_string(),
            None => return bad_request(),
        };

        let mut upstream = match self.injector.connect(&authority).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::debug!(%authority, %err, "injector channel for CONNECT unavailable");
                return bad_gateway();
            }
        };

        let status = match crate::domain::connect_through_injector(&mut upstream, &authority).await {
            Ok(status) => status,
            Err(err) => {
                tracing::debug!(%authority, %err, "failed to complete the CONNECT handshake with the injector");
                return bad_gateway();
            }
        };

        if !status.is_success() {
            tracing::debug!(%authority, %status, "injector refused the CONNECT tunnel");
            return Response::builder()
                .status(status)
                .body(Full::new(Bytes::new()))
                .unwrap_or_else(|_| bad_gateway());
        }

        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    let client = TokioIo::new(upgraded);
                    if let Err(err) = crate::domain::full_duplex(client, upstream).await {
                        tracing::debug!(%authority, %err, "CONNECT tunnel ended with an error");
                    }
                }
                Err(err) => tracing::debug!(%authority, %err, "client never completed the upgrade"),
            }
        });

        Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::new()))
            .expect("a bare 200 response is always well-formed")
    }
}

fn bad_gateway() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(Full::new(Bytes::new()))
        .expect("a bare status response is always well-formed")
}

fn bad_request() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Full::new(Bytes::new()))
        .expect("a bare status response is always well-formed")
}
