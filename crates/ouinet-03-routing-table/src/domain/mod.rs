pub mod bucket;
pub mod routing_node;
pub mod table;

pub use bucket::{RoutingBucket, TryAddOutcome, K};
pub use routing_node::{RoutingNode, BAD_AFTER_FAILURES, QUESTIONABLE_AFTER_SECS};
pub use table::{FailResult, RoutingTable, TryAddResult};
