//! The routing table: a binary trie of k-buckets, held in an arena so a leaf
//! can split in place without upsetting any in-progress walk.
//!
//! Reference: `spec.md` §4.2, and §9 design note "Shared mutable graph
//! (routing table trie)" — an arena of handles is the strategy chosen there.

use ouinet_01_identity::{xor_distance, Contact, NodeId, Range};

use super::bucket::{RoutingBucket, TryAddOutcome, K};
use super::routing_node::RoutingNode;

/// A trie node is either a leaf holding a bucket, or a branch holding the
/// arena indices of its two children.
#[derive(Debug)]
enum NodeKind {
    Leaf(RoutingBucket),
    Branch { zero: usize, one: usize },
}

#[derive(Debug)]
struct TrieNode {
    range: Range,
    depth: usize,
    kind: NodeKind,
}

/// Outcome of [`RoutingTable::try_add`], mirroring [`TryAddOutcome`] plus the
/// pings the caller must start as a side effect of this transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryAddResult {
    pub outcome: TryAddOutcome,
    /// Contacts the caller must ping as a result of this transaction (a new
    /// unverified contact, a candidate probing a bad node, or questionable
    /// live nodes that now need a liveness check).
    pub pings_to_start: Vec<Contact>,
}

/// Outcome of [`RoutingTable::fail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailResult {
    pub ping_to_start: Option<Contact>,
}

/// A binary-trie Kademlia routing table, keyed by XOR distance to `local_id`.
pub struct RoutingTable {
    local_id: NodeId,
    arena: Vec<TrieNode>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            arena: vec![TrieNode {
                range: Range::max(),
                depth: 0,
                kind: NodeKind::Leaf(RoutingBucket::new()),
            }],
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Walk the trie by bit index down to the leaf whose range contains
    /// `id`, splitting full leaves along the way when `allow_split` and the
    /// splitting rules permit it (`spec.md` §3 "RoutingTable").
    pub fn find_bucket(&mut self, id: &NodeId, allow_split: bool) -> usize {
        let mut idx = 0;
        loop {
            match &self.arena[idx].kind {
                NodeKind::Branch { zero, one } => {
                    let depth = self.arena[idx].depth;
                    idx = if id.bit(depth) { *one } else { *zero };
                }
                NodeKind::Leaf(bucket) => {
                    if allow_split && bucket.is_full() && self.can_split(idx) {
                        self.split(idx);
                        continue;
                    }
                    return idx;
                }
            }
        }
    }

    fn leaf_bucket(&self, idx: usize) -> &RoutingBucket {
        match &self.arena[idx].kind {
            NodeKind::Leaf(bucket) => bucket,
            NodeKind::Branch { .. } => unreachable!("index does not name a leaf"),
        }
    }

    fn leaf_bucket_mut(&mut self, idx: usize) -> &mut RoutingBucket {
        match &mut self.arena[idx].kind {
            NodeKind::Leaf(bucket) => bucket,
            NodeKind::Branch { .. } => unreachable!("index does not name a leaf"),
        }
    }

    /// `spec.md` §3: a bucket may split when full only if (a) its range
    /// contains the local id, (b) its depth is a multiple of 5, or (c) it is
    /// a descendant of the exhaustive-region root.
    fn can_split(&self, idx: usize) -> bool {
        let node = &self.arena[idx];
        node.range.contains(&self.local_id)
            || node.depth % 5 == 0
            || self.is_descendant_of_exhaustive_root(idx)
    }

    /// Path of arena indices from the root down to the leaf containing the
    /// local id.
    fn path_to_local(&self) -> Vec<usize> {
        let mut path = vec![0];
        let mut idx = 0;
        loop {
            match &self.arena[idx].kind {
                NodeKind::Branch { zero, one } => {
                    let depth = self.arena[idx].depth;
                    idx = if self.local_id.bit(depth) { *one } else { *zero };
                    path.push(idx);
                }
                NodeKind::Leaf(_) => return path,
            }
        }
    }

    fn subtree_count(&self, idx: usize) -> usize {
        match &self.arena[idx].kind {
            NodeKind::Leaf(bucket) => bucket.len(),
            NodeKind::Branch { zero, one } => self.subtree_count(*zero) + self.subtree_count(*one),
        }
    }

    /// The depth of the smallest (most specific) subtree containing the
    /// local id that holds at least `K` contacts; 0 (the whole table) if no
    /// such subtree exists yet, which in practice means the table hasn't
    /// finished converging and may split freely.
    fn exhaustive_root_depth(&self) -> usize {
        for &idx in self.path_to_local().iter().rev() {
            if self.subtree_count(idx) >= K {
                return self.arena[idx].depth;
            }
        }
        0
    }

    fn is_descendant_of_exhaustive_root(&self, idx: usize) -> bool {
        let depth = self.exhaustive_root_depth();
        let node = &self.arena[idx];
        if node.depth < depth {
            return false;
        }
        let prefix = Range {
            stencil: node.range.stencil,
            mask: depth,
        };
        prefix.contains(&self.local_id)
    }

    fn split(&mut self, idx: usize) {
        let depth = self.arena[idx].depth;
        let range = self.arena[idx].range;
        let range0 = range.reduce(false);
        let range1 = range.reduce(true);

        let (nodes, verified_candidates, unverified_candidates) =
            self.leaf_bucket_mut(idx).drain();

        let mut bucket0 = RoutingBucket::new();
        let mut bucket1 = RoutingBucket::new();
        for node in nodes {
            if node.contact.id.map(|id| id.bit(depth)).unwrap_or(false) {
                bucket1.push_existing_node(node);
            } else {
                bucket0.push_existing_node(node);
            }
        }
        for contact in verified_candidates {
            if contact.id.map(|id| id.bit(depth)).unwrap_or(false) {
                bucket1.push_existing_candidate(contact, true);
            } else {
                bucket0.push_existing_candidate(contact, true);
            }
        }
        for contact in unverified_candidates {
            if contact.id.map(|id| id.bit(depth)).unwrap_or(false) {
                bucket1.push_existing_candidate(contact, false);
            } else {
                bucket0.push_existing_candidate(contact, false);
            }
        }

        let zero_idx = self.arena.len();
        self.arena.push(TrieNode {
            range: range0,
            depth: depth + 1,
            kind: NodeKind::Leaf(bucket0),
        });
        let one_idx = self.arena.len();
        self.arena.push(TrieNode {
            range: range1,
            depth: depth + 1,
            kind: NodeKind::Leaf(bucket1),
        });

        self.arena[idx].kind = NodeKind::Branch {
            zero: zero_idx,
            one: one_idx,
        };
    }

    /// The `n` contacts closest to `target` by XOR distance, ties broken by
    /// endpoint (`spec.md` §4.2 tie-break rule).
    pub fn find_closest(&self, target: &NodeId, n: usize) -> Vec<Contact> {
        let mut all = Vec::new();
        self.for_each_bucket(|bucket| {
            for node in bucket.nodes() {
                all.push(node.contact);
            }
        });
        all.sort_by(|a, b| {
            ouinet_01_identity::compare_by_distance(target, a, b).then_with(|| {
                match (a.id, b.id) {
                    (Some(ia), Some(ib)) => {
                        if ouinet_01_identity::closer_to(target, &ia, &ib) {
                            std::cmp::Ordering::Less
                        } else {
                            std::cmp::Ordering::Equal
                        }
                    }
                    _ => std::cmp::Ordering::Equal,
                }
            })
        });
        all.truncate(n);
        all
    }

    /// Visit every leaf bucket in the trie.
    pub fn for_each_bucket(&self, mut visit: impl FnMut(&RoutingBucket)) {
        fn walk(arena: &[TrieNode], idx: usize, visit: &mut impl FnMut(&RoutingBucket)) {
            match &arena[idx].kind {
                NodeKind::Leaf(bucket) => visit(bucket),
                NodeKind::Branch { zero, one } => {
                    walk(arena, *zero, visit);
                    walk(arena, *one, visit);
                }
            }
        }
        walk(&self.arena, 0, &mut visit);
    }

    /// Every bucket's range, for seeding per-bucket refresh lookups during
    /// bootstrap (`spec.md` §4.4 "Bootstrap").
    pub fn bucket_ranges(&self) -> Vec<Range> {
        let mut ranges = Vec::new();
        self.for_each_bucket_with_range(|range, _| ranges.push(*range));
        ranges
    }

    fn for_each_bucket_with_range(&self, mut visit: impl FnMut(&Range, &RoutingBucket)) {
        fn walk(arena: &[TrieNode], idx: usize, visit: &mut impl FnMut(&Range, &RoutingBucket)) {
            match &arena[idx].kind {
                NodeKind::Leaf(bucket) => visit(&arena[idx].range, bucket),
                NodeKind::Branch { zero, one } => {
                    walk(arena, *zero, visit);
                    walk(arena, *one, visit);
                }
            }
        }
        walk(&self.arena, 0, &mut visit);
    }

    /// Apply the insertion transaction from `spec.md` §4.2. Must run to
    /// completion without yielding (`spec.md` §5): no `.await` between
    /// `find_bucket` and the policy application below.
    pub fn try_add(&mut self, contact: Contact, is_verified: bool, now: u64) -> TryAddResult {
        let idx = self.find_bucket(&contact_id_or_local(&contact, &self.local_id), true);
        let outcome = self.leaf_bucket_mut(idx).try_add(contact, is_verified, now);

        let mut pings_to_start = Vec::new();
        match &outcome {
            TryAddOutcome::PingRequested => pings_to_start.push(contact),
            TryAddOutcome::ReplacementPingRequested { candidate_for } => {
                self.leaf_bucket_mut(idx).mark_ping_ongoing(candidate_for);
                pings_to_start.push(*candidate_for);
            }
            TryAddOutcome::Queued => {
                let needing_ping = self.leaf_bucket(idx).questionable_nodes_needing_ping(now);
                for contact in &needing_ping {
                    self.leaf_bucket_mut(idx).mark_ping_ongoing(contact);
                }
                pings_to_start.extend(needing_ping);
            }
            _ => {}
        }

        TryAddResult {
            outcome,
            pings_to_start,
        }
    }

    /// Apply the failure transaction from `spec.md` §4.2.
    pub fn fail(&mut self, contact: &Contact) -> FailResult {
        let idx = self.find_bucket(&contact_id_or_local(contact, &self.local_id), false);
        let ping_to_start = self.leaf_bucket_mut(idx).fail(contact);
        FailResult { ping_to_start }
    }
}

/// The trie is keyed by node id; an id-less contact (a bootstrap seed) has no
/// natural position, so it's treated as belonging wherever the local id
/// would, which is always a valid (non-splitting-sensitive) leaf to probe.
fn contact_id_or_local(contact: &Contact, local_id: &NodeId) -> NodeId {
    contact.id.unwrap_or(*local_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn id(first_byte: u8) -> NodeId {
        let mut bytes = [0u8; 20];
        bytes[0] = first_byte;
        NodeId::from_bytes(bytes)
    }

    fn contact(id_val: NodeId, port: u16) -> Contact {
        Contact::new(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port),
            id_val,
        )
    }

    #[test]
    fn find_bucket_never_mutates_when_split_disallowed() {
        let local = NodeId::zero();
        let mut table = RoutingTable::new(local);
        let before = table.arena.len();
        table.find_bucket(&id(0xff), false);
        assert_eq!(table.arena.len(), before);
    }

    #[test]
    fn inserting_far_contacts_splits_away_from_local_id() {
        let local = NodeId::zero();
        let mut table = RoutingTable::new(local);
        // All of these share a prefix far from local id (top bit set) and
        // don't satisfy "contains local id", so only the depth%5==0 and
        // exhaustive-region rules let the bucket split.
        for i in 0..20u16 {
            let far_id = id(0b1000_0000u8.wrapping_add(i as u8));
            table.try_add(contact(far_id, i), true, 0);
        }
        let mut total = 0;
        table.for_each_bucket(|b| total += b.len());
        assert!(total <= 20);
        assert!(total > 0);
    }

    #[test]
    fn find_closest_orders_by_xor_distance() {
        let local = NodeId::zero();
        let mut table = RoutingTable::new(local);
        let near = id(0x01);
        let far = id(0x80);
        table.try_add(contact(near, 1), true, 0);
        table.try_add(contact(far, 2), true, 0);
        let closest = table.find_closest(&NodeId::zero(), 1);
        assert_eq!(closest[0].id, Some(near));
    }

    #[test]
    fn try_add_of_bucket_already_containing_contact_refreshes() {
        let local = NodeId::zero();
        let mut table = RoutingTable::new(local);
        let c = contact(id(0x10), 1);
        table.try_add(c, true, 0);
        let result = table.try_add(c, true, 10);
        assert_eq!(result.outcome, TryAddOutcome::Refreshed);
    }

    #[test]
    fn fail_on_unknown_contact_is_a_no_op() {
        let local = NodeId::zero();
        let mut table = RoutingTable::new(local);
        let result = table.fail(&contact(id(0x10), 1));
        assert_eq!(result.ping_to_start, None);
    }
}
