//! Adapts the matched [`RequestConfig`]'s responder queue into a single
//! [`FreshFetcher`][ff], the seam `ouinet-06-cache-control::CacheControl`
//! fetches through when the cache misses or is disabled.
//!
//! [ff]: ouinet_06_cache_control::FreshFetcher

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use ouinet_06_cache_control::CacheControlError;

use crate::domain::Responder;
use crate::ports::{FrontEnd, InjectorClient, OriginClient, ProxyClient};

/// Walks `responders` in order, returning the first successful response.
/// `spec.md` §4.6: "the responder queue is tried in order; the first
/// responder to succeed produces the response."
pub struct ResponderChain<O, P, I, F> {
    responders: VecDeque<Responder>,
    origin: O,
    proxy: P,
    injector: I,
    front_end: F,
}

impl<O, P, I, F> ResponderChain<O, P, I, F>
where
    O: OriginClient,
    P: ProxyClient,
    I: InjectorClient,
    F: FrontEnd,
{
    pub fn new(responders: VecDeque<Responder>, origin: O, proxy: P, injector: I, front_end: F) -> Self {
        Self {
            responders,
            origin,
            proxy,
            injector,
            front_end,
        }
    }

    async fn try_fetch(&self, request: &Request<Bytes>) -> Result<Response<Bytes>, CacheControlError> {
        let mut last_error = None;
        for responder in &self.responders {
            let outcome = match responder {
                Responder::Origin => self.origin.fetch(clone_request(request)).await,
                Responder::Proxy => self.proxy.fetch(clone_request(request)).await,
                Responder::Injector => self.injector.fetch(clone_request(request)).await,
                Responder::FrontEnd => self.front_end.handle(clone_request(request)).await,
            };
            match outcome {
                Ok(response) => return Ok(response),
                Err(err) => {
                    tracing::debug!(?responder, %err, "responder failed, trying the next one");
                    last_error = Some(err);
                }
            }
        }
        Err(CacheControlError::FreshFetchFailed(
            last_error.unwrap_or_else(|| "no responders configured".to_string()),
        ))
    }
}

#[async_trait]
impl<O, P, I, F> ouinet_06_cache_control::FreshFetcher for ResponderChain<O, P, I, F>
where
    O: OriginClient,
    P: ProxyClient,
    I: InjectorClient,
    F: FrontEnd,
{
    async fn fetch_fresh(&self, request: &Request<Bytes>) -> Result<Response<Bytes>, CacheControlError> {
        self.try_fetch(request).await
    }
}

fn clone_request(request: &Request<Bytes>) -> Request<Bytes> {
    let mut builder = Request::builder().method(request.method().clone()).uri(request.uri().clone()).version(request.version());
    for (name, value) in request.headers() {
        builder = builder.header(name, value);
    }
    builder.body(request.body().clone()).expect("cloned request is always well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingOrigin;
    #[async_trait]
    impl OriginClient for FailingOrigin {
        async fn fetch(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, String> {
            Err("origin down".to_string())
        }
        async fn connect(&self, _authority: &str) -> Result<Box<dyn crate::ports::TunnelStream>, String> {
            Err("not used in this test".to_string())
        }
    }

    struct FailingProxy;
    #[async_trait]
    impl ProxyClient for FailingProxy {
        async fn fetch(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, String> {
            Err("proxy down".to_string())
        }
    }

    struct CountingInjector {
        calls: AtomicUsize,
    }
    #[async_trait]
    impl InjectorClient for CountingInjector {
        async fn fetch(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::builder().status(200).body(Bytes::from("from injector")).unwrap())
        }

        async fn connect(&self, _authority: &str) -> Result<Box<dyn crate::ports::TunnelStream>, String> {
            Err("not used in this test".to_string())
        }
    }

    struct UnusedFrontEnd;
    #[async_trait]
    impl FrontEnd for UnusedFrontEnd {
        async fn handle(&self, _request: Request<Bytes>) -> Result<Response<Bytes>, String> {
            Err("not reached".to_string())
        }
    }

    fn request() -> Request<Bytes> {
        Request::builder().uri("http://example.net/").body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn falls_through_failing_responders_to_the_first_success() {
        use ouinet_06_cache_control::FreshFetcher;

        let chain = ResponderChain::new(
            VecDeque::from([Responder::Origin, Responder::Proxy, Responder::Injector]),
            FailingOrigin,
            FailingProxy,
            CountingInjector { calls: AtomicUsize::new(0) },
            UnusedFrontEnd,
        );

        let response = chain.fetch_fresh(&request()).await.unwrap();
        assert_eq!(response.body(), &Bytes::from("from injector"));
        assert_eq!(chain.injector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn an_empty_queue_fails() {
        use ouinet_06_cache_control::FreshFetcher;

        let chain = ResponderChain::new(
            VecDeque::new(),
            FailingOrigin,
            FailingProxy,
            CountingInjector { calls: AtomicUsize::new(0) },
            UnusedFrontEnd,
        );
        assert!(chain.fetch_fresh(&request()).await.is_err());
    }
}
