//! Direct-to-origin fetches and `CONNECT` tunnels, built on hyper's legacy
//! client connector and plain `TcpStream`s.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use ouinet_07_request_router::{OriginClient, TunnelStream};
use tokio::net::TcpStream;

pub struct HttpOriginClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpOriginClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        }
    }
}

impl Default for HttpOriginClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OriginClient for HttpOriginClient {
    async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String> {
        let (parts, body) = request.into_parts();
        let request = Request::from_parts(parts, Full::new(body));

        let response = self.client.request(request).await.map_err(|err| err.to_string())?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await.map_err(|err| err.to_string())?.to_bytes();
        Ok(Response::from_parts(parts, body))
    }

    async fn connect(&self, authority: &str) -> Result<Box<dyn TunnelStream>, String> {
        let stream = TcpStream::connect(authority).await.map_err(|err| err.to_string())?;
        Ok(Box::new(stream))
    }
}
