pub mod dht_node;

pub use dht_node::{DhtNode, RESPONSIBLE_TRACKERS_PER_SWARM};
