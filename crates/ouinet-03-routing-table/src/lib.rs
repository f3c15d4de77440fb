//! # Routing Table
//!
//! A binary-trie routing table of k-buckets with splitting, candidate
//! replacement, and liveness-based failure handling.
//!
//! Reference: `spec.md` §4.2; §9 "Shared mutable graph (routing table trie)".

pub mod domain;

pub use domain::{
    FailResult, RoutingBucket, RoutingNode, RoutingTable, TryAddOutcome, TryAddResult,
    BAD_AFTER_FAILURES, K, QUESTIONABLE_AFTER_SECS,
};
