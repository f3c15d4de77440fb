//! In-flight outbound queries, matched to their replies by transaction id.
//!
//! Reference: `spec.md` §3 "ActiveRequest"; §5 "Ordering guarantees".

use std::collections::HashMap;
use std::net::SocketAddr;

use ouinet_01_identity::NodeId;
use tokio::sync::oneshot;

use super::errors::DhtError;
use super::message::Message;

/// An in-flight query: who we sent it to, who should answer, and the
/// channel that resumes the waiting caller.
pub struct ActiveRequest {
    pub destination: SocketAddr,
    pub expected_responder: Option<NodeId>,
    reply: oneshot::Sender<Result<Message, DhtError>>,
}

/// Transaction-id-keyed table of outstanding queries. Unique per
/// `transaction_id`; a collision is a programmer error (`spec.md` §3).
#[derive(Default)]
pub struct ActiveRequestTable {
    requests: HashMap<Vec<u8>, ActiveRequest>,
}

impl ActiveRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new outbound query, returning the receiver half that
    /// resolves when a matching reply arrives or the request times out.
    pub fn register(
        &mut self,
        transaction_id: Vec<u8>,
        destination: SocketAddr,
        expected_responder: Option<NodeId>,
    ) -> oneshot::Receiver<Result<Message, DhtError>> {
        let (tx, rx) = oneshot::channel();
        let previous = self.requests.insert(
            transaction_id,
            ActiveRequest {
                destination,
                expected_responder,
                reply: tx,
            },
        );
        debug_assert!(
            previous.is_none(),
            "transaction id collision: programmer error per spec.md §3"
        );
        rx
    }

    /// Resume the waiter for `transaction_id` if one exists and `source`
    /// matches the destination it was sent to (`spec.md` §5: a response
    /// from the wrong endpoint is dropped). Returns `true` if a waiter was
    /// resumed.
    pub fn resolve(&mut self, transaction_id: &[u8], source: SocketAddr, message: Message) -> bool {
        let Some(request) = self.requests.get(transaction_id) else {
            return false;
        };
        if request.destination != source {
            return false;
        }
        let request = self.requests.remove(transaction_id).expect("just checked");
        let _ = request.reply.send(Ok(message));
        true
    }

    /// Release a request's slot after its timeout fires. Returns `false` if
    /// the slot was already resolved (e.g. a reply raced the timeout), in
    /// which case the caller must not resume anything further — late
    /// replies are simply dropped (`spec.md` §5 "Cancellation & timeouts").
    pub fn expire(&mut self, transaction_id: &[u8]) -> bool {
        if let Some(request) = self.requests.remove(transaction_id) {
            let _ = request.reply.send(Err(DhtError::Timeout));
            true
        } else {
            false
        }
    }

    /// Abort every outstanding request, as happens when the multiplexer's
    /// socket closes on shutdown (`spec.md` §5).
    pub fn abort_all(&mut self) {
        for (_, request) in self.requests.drain() {
            let _ = request.reply.send(Err(DhtError::Aborted));
        }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
