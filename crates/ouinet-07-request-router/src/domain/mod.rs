pub mod errors;
pub mod predicate;
pub mod relay;
pub mod request_config;
pub mod route_table;

pub use errors::RouterError;
pub use predicate::{Extractor, Predicate};
pub use relay::{connect_through_injector, full_duplex};
pub use request_config::{RequestConfig, Responder};
pub use route_table::{Rule, RouteTable};
