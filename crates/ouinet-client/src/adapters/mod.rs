pub mod cache_store;
pub mod front_end;
pub mod origin;
pub mod upstream_http;

pub use cache_store::{InMemoryCacheStore, SystemClock};
pub use front_end::StatusPage;
pub use origin::HttpOriginClient;
pub use upstream_http::{Unconfigured, UpstreamHttpClient};
