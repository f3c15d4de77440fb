//! The generic iterative search ("collect") driver, shared by `find_node`,
//! `get_peers`, and the BEP 44 `get`/`put` lookups.
//!
//! Reference: `spec.md` §4.4 "Iterative search ('collect')"; §5 "Parallelism
//! within a search"; §9 "Coroutine fan-out".

use std::collections::HashSet;
use std::net::SocketAddr;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use ouinet_01_identity::{compare_by_distance, Contact, NodeId};

/// Logical fan-out bound: a fairness/latency knob, not a throughput knob
/// (`spec.md` §5) — the driver runs on a single task, interleaving these at
/// suspension points rather than spreading them over OS threads.
pub const THREADS: usize = 64;

/// What a candidate evaluation contributes back to the search.
pub enum EvalOutcome {
    /// The caller has its answer; stop launching new work.
    Stop,
    /// New candidates discovered via this contact, to merge into the
    /// frontier (already-seen endpoints are deduplicated away).
    Candidates(Vec<Contact>),
}

/// Drive the iterative search described in `spec.md` §4.4.
///
/// `evaluate` is called once per visited candidate; it should query the
/// candidate and interpret the reply. The driver returns every candidate
/// that was evaluated, in the order they completed.
pub async fn collect<F, Fut>(target: NodeId, seed: Vec<Contact>, mut evaluate: F) -> Vec<Contact>
where
    F: FnMut(Contact) -> Fut,
    Fut: std::future::Future<Output = EvalOutcome>,
{
    let mut pending = seed;
    sort_by_distance(&mut pending, &target);

    let mut seen: HashSet<SocketAddr> = pending.iter().map(|c| c.endpoint).collect();
    let mut done = Vec::new();
    let mut stopped = false;

    let mut in_flight = FuturesUnordered::new();

    loop {
        while !stopped && in_flight.len() < THREADS && !pending.is_empty() {
            let candidate = pending.remove(0);
            let fut = evaluate(candidate);
            in_flight.push(async move { (candidate, fut.await) });
        }

        if in_flight.is_empty() {
            break;
        }

        let (candidate, outcome) = in_flight.next().await.expect("in_flight is non-empty");
        done.push(candidate);

        match outcome {
            EvalOutcome::Stop => {
                stopped = true;
                pending.clear();
            }
            EvalOutcome::Candidates(new_candidates) => {
                if !stopped {
                    for contact in new_candidates {
                        if seen.insert(contact.endpoint) {
                            pending.push(contact);
                        }
                    }
                    sort_by_distance(&mut pending, &target);
                }
            }
        }
    }

    done
}

fn sort_by_distance(contacts: &mut [Contact], target: &NodeId) {
    contacts.sort_by(|a, b| compare_by_distance(target, a, b));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn contact(last_byte: u8, port: u16) -> Contact {
        let mut bytes = [0u8; 20];
        bytes[19] = last_byte;
        Contact::new(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port),
            NodeId::from_bytes(bytes),
        )
    }

    #[tokio::test]
    async fn terminates_when_no_candidate_yields_anything_new() {
        let target = NodeId::zero();
        let seed = vec![contact(1, 1), contact(2, 2)];
        let visited = Arc::new(AtomicUsize::new(0));
        let visited2 = visited.clone();

        let result = collect(target, seed, move |_candidate| {
            let visited = visited2.clone();
            async move {
                visited.fetch_add(1, Ordering::SeqCst);
                EvalOutcome::Candidates(vec![])
            }
        })
        .await;

        assert_eq!(result.len(), 2);
        assert_eq!(visited.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_halts_further_expansion() {
        let target = NodeId::zero();
        let seed = vec![contact(1, 1)];

        let result = collect(target, seed, |candidate| async move {
            if candidate.endpoint.port() == 1 {
                EvalOutcome::Candidates(vec![contact(2, 2)])
            } else {
                EvalOutcome::Stop
            }
        })
        .await;

        // Both the seed and the one new candidate are visited before the
        // second one's Stop is observed, but no further candidates follow.
        assert!(result.len() <= 2);
    }

    #[tokio::test]
    async fn deduplicates_already_seen_endpoints() {
        let target = NodeId::zero();
        let seed = vec![contact(1, 1)];
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        collect(target, seed, move |candidate| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if candidate.endpoint.port() == 1 {
                    EvalOutcome::Candidates(vec![contact(1, 1), contact(2, 2)])
                } else {
                    EvalOutcome::Candidates(vec![])
                }
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
