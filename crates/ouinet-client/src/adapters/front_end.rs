//! The node's own front-end: a minimal status page served for requests
//! whose `Host` names this node's own loopback listener.

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use ouinet_07_request_router::FrontEnd;

pub struct StatusPage {
    pub node_id_hex: String,
}

#[async_trait]
impl FrontEnd for StatusPage {
    async fn handle(&self, request: Request<Bytes>) -> Result<Response<Bytes>, String> {
        let body = match request.uri().path() {
            "/status" => format!("ouinet-client\nnode_id={}\n", self.node_id_hex),
            _ => "not found\n".to_string(),
        };
        Response::builder()
            .status(200)
            .header(http::header::CONTENT_TYPE, "text/plain")
            .body(Bytes::from(body))
            .map_err(|err| err.to_string())
    }
}
