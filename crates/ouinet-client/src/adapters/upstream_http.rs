//! A generic "forward the request to a fixed HTTP endpoint" client, reused
//! for both the configured upstream proxy and the injector: both are, from
//! this node's point of view, just another HTTP server to relay through.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use ouinet_07_request_router::{InjectorClient, ProxyClient, TunnelStream};
use tokio::net::TcpStream;

pub struct UpstreamHttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    endpoint: String,
}

impl UpstreamHttpClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            endpoint,
        }
    }

    async fn forward(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String> {
        let (mut parts, body) = request.into_parts();
        let path_and_query = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/").to_string();
        parts.uri = format!("http://{}{}", self.endpoint, path_and_query)
            .parse()
            .map_err(|err: http::uri::InvalidUri| err.to_string())?;

        let request = Request::from_parts(parts, Full::new(body));
        let response = self.client.request(request).await.map_err(|err| err.to_string())?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await.map_err(|err| err.to_string())?.to_bytes();
        Ok(Response::from_parts(parts, body))
    }

    async fn open_channel(&self) -> Result<Box<dyn TunnelStream>, String> {
        let stream = TcpStream::connect(self.endpoint.as_str()).await.map_err(|err| err.to_string())?;
        Ok(Box::new(stream))
    }
}

/// No responder is configured until the operator sets `--injector-ep` or
/// an upstream `--proxy`; this stand-in always fails so the responder
/// queue moves on to the next entry.
pub struct Unconfigured;

#[async_trait]
impl ProxyClient for Unconfigured {
    async fn fetch(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, String> {
        Err("no upstream proxy configured".to_string())
    }
}

#[async_trait]
impl InjectorClient for Unconfigured {
    async fn fetch(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, String> {
        Err("no injector configured".to_string())
    }

    async fn connect(&self, _authority: &str) -> Result<Box<dyn TunnelStream>, String> {
        Err("no injector configured".to_string())
    }
}

#[async_trait]
impl ProxyClient for UpstreamHttpClient {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String> {
        self.forward(request).await
    }
}

#[async_trait]
impl InjectorClient for UpstreamHttpClient {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String> {
        self.forward(request).await
    }

    async fn connect(&self, _authority: &str) -> Result<Box<dyn TunnelStream>, String> {
        self.open_channel().await
    }
}
