//! A remote endpoint paired with an optional node identifier.
//!
//! Reference: `spec.md` §3 "Contact".

use std::net::SocketAddr;

use crate::node_id::{closer_to, NodeId};

/// A UDP endpoint, optionally paired with the node identifier it claims.
///
/// Bootstrap seeds are added to the table before their identifier is known;
/// such contacts compare as farthest from any target (`spec.md` §3).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Contact {
    pub endpoint: SocketAddr,
    pub id: Option<NodeId>,
}

impl Contact {
    pub fn new(endpoint: SocketAddr, id: NodeId) -> Self {
        Self {
            endpoint,
            id: Some(id),
        }
    }

    /// A bootstrap seed: an endpoint whose identifier isn't known yet.
    pub fn seed(endpoint: SocketAddr) -> Self {
        Self { endpoint, id: None }
    }

    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }
}

/// Order contacts by XOR distance to `target`; id-less contacts sort last
/// regardless of distance (`spec.md` §4.4 "collect", step 1).
pub fn compare_by_distance(target: &NodeId, a: &Contact, b: &Contact) -> std::cmp::Ordering {
    match (a.id, b.id) {
        (Some(ia), Some(ib)) => {
            if closer_to(target, &ia, &ib) {
                std::cmp::Ordering::Less
            } else if closer_to(target, &ib, &ia) {
                std::cmp::Ordering::Greater
            } else {
                a.endpoint.to_string().cmp(&b.endpoint.to_string())
            }
        }
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.endpoint.to_string().cmp(&b.endpoint.to_string()),
    }
}
