//! The DHT node service: owns the routing table, tracker, and active
//! requests, and drives the single receive loop and query protocol.
//!
//! Reference: `spec.md` §4.4 "DHT Node"; §5 "Concurrency & resource model".

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ouinet_01_identity::{closer_to, Contact, DictBuilder, NodeId, Value};
use ouinet_03_routing_table::{RoutingTable, K};
use ouinet_04_peer_tracker::{InfoHash, PeerTracker};
use tokio::sync::Mutex;

use crate::domain::{
    collect, decode_endpoint, decode_nodes_v4, decode_nodes_v6, encode_endpoint, encode_nodes_v4,
    encode_nodes_v6, ActiveRequestTable, DhtError, EvalOutcome, Message, MutableItem,
    TransactionIdGenerator,
};
use crate::ports::{NetworkPort, TimeSource};

/// For a key, the number of closest nodes considered "responsible" for it.
pub const RESPONSIBLE_TRACKERS_PER_SWARM: usize = 8;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(15);
const ROUTING_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const WRITE_QUERY_MAX_RETRIES: u32 = 5;

struct State {
    local_id: NodeId,
    routing_table: RoutingTable,
    tracker: PeerTracker,
    active_requests: ActiveRequestTable,
    txid_gen: TransactionIdGenerator,
    initialized: bool,
    bootstrap_contacts: Vec<Contact>,
    immutable_store: HashMap<NodeId, Value>,
    mutable_store: HashMap<NodeId, MutableItem>,
}

/// Owns every piece of DHT state. All user operations fail with
/// [`DhtError::NotInitialized`] until [`DhtNode::bootstrap`] completes
/// (`spec.md` §4.4 "Bootstrap").
pub struct DhtNode<N: NetworkPort, T: TimeSource> {
    network: N,
    time: T,
    state: Mutex<State>,
}

impl<N, T> DhtNode<N, T>
where
    N: NetworkPort + 'static,
    T: TimeSource + 'static,
{
    /// Construct a node with a placeholder identity; [`DhtNode::bootstrap`]
    /// derives the real BEP 42 identity once the external address is known.
    pub fn new(network: N, time: T) -> Arc<Self> {
        let placeholder_id = NodeId::random();
        Arc::new(Self {
            network,
            time,
            state: Mutex::new(State {
                local_id: placeholder_id,
                routing_table: RoutingTable::new(placeholder_id),
                tracker: PeerTracker::new(),
                active_requests: ActiveRequestTable::new(),
                txid_gen: TransactionIdGenerator::new(),
                initialized: false,
                bootstrap_contacts: Vec::new(),
                immutable_store: HashMap::new(),
                mutable_store: HashMap::new(),
            }),
        })
    }

    pub async fn local_id(&self) -> NodeId {
        self.state.lock().await.local_id
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    fn require_initialized_sync(state: &State) -> Result<(), DhtError> {
        if state.initialized {
            Ok(())
        } else {
            Err(DhtError::NotInitialized)
        }
    }

    // -- query plumbing -----------------------------------------------

    async fn send_query(
        &self,
        verb: &str,
        args: Value,
        destination: SocketAddr,
        expected_responder: Option<NodeId>,
        timeout: Duration,
    ) -> Result<Message, DhtError> {
        let (txid, rx) = {
            let mut state = self.state.lock().await;
            let txid = state.txid_gen.next();
            let rx = state
                .active_requests
                .register(txid.clone(), destination, expected_responder);
            (txid, rx)
        };

        let query = Message::query(txid.clone(), verb, args);
        self.network.send(&query.encode(), destination).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_canceled)) => Err(DhtError::Aborted),
            Err(_elapsed) => {
                self.state.lock().await.active_requests.expire(&txid);
                Err(DhtError::Timeout)
            }
        }
    }

    async fn try_add_contact(self: &Arc<Self>, contact: Contact, verified: bool) {
        let now = self.time.now();
        let result = {
            let mut state = self.state.lock().await;
            state.routing_table.try_add(contact, verified, now)
        };
        for target in result.pings_to_start {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let _ = this.ping(target.endpoint).await;
            });
        }
    }

    async fn fail_contact(self: &Arc<Self>, contact: Contact) {
        let result = {
            let mut state = self.state.lock().await;
            state.routing_table.fail(&contact)
        };
        if let Some(target) = result.ping_to_start {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let _ = this.ping(target.endpoint).await;
            });
        }
    }

    // -- outbound queries -----------------------------------------------

    /// `spec.md` §4.4 "Message layer": a bare liveness check.
    pub async fn ping(self: &Arc<Self>, destination: SocketAddr) -> Result<NodeId, DhtError> {
        let local_id = self.local_id().await;
        let args = DictBuilder::new()
            .insert("id", Value::bytes(local_id.to_bytestring()))
            .build();
        let reply = self
            .send_query("ping", args, destination, None, DEFAULT_TIMEOUT)
            .await?;
        match reply {
            Message::Response { r, .. } => {
                let remote_id = read_id(&r)?;
                self.try_add_contact(Contact::new(destination, remote_id), true)
                    .await;
                Ok(remote_id)
            }
            Message::Error { code, description, .. } => {
                Err(DhtError::Protocol(format!("ping error {code}: {description}")))
            }
            _ => Err(DhtError::Protocol("unexpected reply to ping".into())),
        }
    }

    async fn query_find_node(
        self: &Arc<Self>,
        candidate: Contact,
        target: NodeId,
    ) -> Result<Vec<Contact>, DhtError> {
        let local_id = self.local_id().await;
        let args = DictBuilder::new()
            .insert("id", Value::bytes(local_id.to_bytestring()))
            .insert("target", Value::bytes(target.to_bytestring()))
            .build();
        let reply = self
            .send_query(
                "find_node",
                args,
                candidate.endpoint,
                candidate.id,
                ROUTING_PROBE_TIMEOUT,
            )
            .await?;
        match reply {
            Message::Response { r, .. } => {
                self.try_add_contact(candidate, true).await;
                Ok(contacts_from_nodes_fields(&r))
            }
            _ => Err(DhtError::Protocol("find_node query failed".into())),
        }
    }

    /// The iterative `find_node` search (`spec.md` §4.4 "Iterative search").
    /// Terminates naturally once the frontier is exhausted: a valid reading
    /// of "the closest K so far is closed" when no candidate ever returns
    /// anything new (see `DESIGN.md`).
    pub async fn find_node(self: &Arc<Self>, target: NodeId) -> Result<Vec<Contact>, DhtError> {
        let state = self.state.lock().await;
        Self::require_initialized_sync(&state)?;
        let mut seed = state.routing_table.find_closest(&target, K);
        seed.extend(state.bootstrap_contacts.iter().copied());
        drop(state);
        Ok(self.find_node_inner(target, seed).await)
    }

    /// The `find_node` search proper, seeded explicitly. Used directly by
    /// [`DhtNode::bootstrap`], which must run before `initialized` is set and
    /// so cannot go through the public, initialization-gated [`DhtNode::find_node`].
    async fn find_node_inner(self: &Arc<Self>, target: NodeId, seed: Vec<Contact>) -> Vec<Contact> {
        let this = Arc::clone(self);
        let visited = collect(target, seed, move |candidate| {
            let this = Arc::clone(&this);
            async move {
                match this.query_find_node(candidate, target).await {
                    Ok(contacts) => EvalOutcome::Candidates(contacts),
                    Err(_) => {
                        this.fail_contact(candidate).await;
                        EvalOutcome::Candidates(vec![])
                    }
                }
            }
        })
        .await;

        let mut visited = visited;
        visited.sort_by(|a, b| ouinet_01_identity::compare_by_distance(&target, a, b));
        visited.truncate(K);
        visited
    }

    async fn query_get_peers(
        self: &Arc<Self>,
        candidate: Contact,
        infohash: InfoHash,
    ) -> Result<(Vec<Contact>, Vec<SocketAddr>, Option<Vec<u8>>), DhtError> {
        let local_id = self.local_id().await;
        let args = DictBuilder::new()
            .insert("id", Value::bytes(local_id.to_bytestring()))
            .insert("info_hash", Value::bytes(infohash.to_vec()))
            .build();
        let reply = self
            .send_query(
                "get_peers",
                args,
                candidate.endpoint,
                candidate.id,
                ROUTING_PROBE_TIMEOUT,
            )
            .await?;
        match reply {
            Message::Response { r, .. } => {
                self.try_add_contact(candidate, true).await;
                let contacts = contacts_from_nodes_fields(&r);
                let peers = r
                    .get("values")
                    .and_then(Value::as_list)
                    .map(|list| {
                        list.iter()
                            .filter_map(Value::as_bytes)
                            .filter_map(decode_endpoint)
                            .collect()
                    })
                    .unwrap_or_default();
                let token = r.get("token").and_then(Value::as_bytes).map(|b| b.to_vec());
                Ok((contacts, peers, token))
            }
            _ => Err(DhtError::Protocol("get_peers query failed".into())),
        }
    }

    /// `tracker_get_peers`: the union of `values` across the
    /// [`RESPONSIBLE_TRACKERS_PER_SWARM`] closest replying nodes, plus the
    /// tokens needed to announce to each (`spec.md` §4.4, scenario S3).
    pub async fn tracker_get_peers(
        self: &Arc<Self>,
        infohash: InfoHash,
    ) -> Result<(Vec<SocketAddr>, Vec<(Contact, Vec<u8>)>), DhtError> {
        let target = NodeId::from_bytestring(&infohash).expect("infohash is 20 bytes");
        let state = self.state.lock().await;
        Self::require_initialized_sync(&state)?;
        let mut seed = state.routing_table.find_closest(&target, K);
        seed.extend(state.bootstrap_contacts.iter().copied());
        drop(state);

        let peers = Arc::new(Mutex::new(Vec::<SocketAddr>::new()));
        let tokens = Arc::new(Mutex::new(Vec::<(Contact, Vec<u8>)>::new()));
        let replied = Arc::new(AtomicUsize::new(0));
        let this = Arc::clone(self);

        collect(target, seed, move |candidate| {
            let this = Arc::clone(&this);
            let peers = Arc::clone(&peers);
            let tokens = Arc::clone(&tokens);
            let replied = Arc::clone(&replied);
            async move {
                match this.query_get_peers(candidate, infohash).await {
                    Ok((contacts, found_peers, token)) => {
                        let mut has_signal = !found_peers.is_empty();
                        if let Some(token) = token {
                            has_signal = true;
                            tokens.lock().await.push((candidate, token));
                        }
                        if !found_peers.is_empty() {
                            peers.lock().await.extend(found_peers);
                        }
                        if has_signal {
                            replied.fetch_add(1, Ordering::SeqCst);
                        }
                        if replied.load(Ordering::SeqCst) >= RESPONSIBLE_TRACKERS_PER_SWARM {
                            EvalOutcome::Stop
                        } else {
                            EvalOutcome::Candidates(contacts)
                        }
                    }
                    Err(_) => {
                        this.fail_contact(candidate).await;
                        EvalOutcome::Candidates(vec![])
                    }
                }
            }
        })
        .await;

        let mut peers = Arc::try_unwrap(peers)
            .map(Mutex::into_inner)
            .unwrap_or_default();
        peers.sort_unstable_by_key(|a| a.to_string());
        peers.dedup();
        let tokens = Arc::try_unwrap(tokens).map(Mutex::into_inner).unwrap_or_default();
        Ok((peers, tokens))
    }

    async fn announce_to_node(
        self: &Arc<Self>,
        contact: Contact,
        infohash: InfoHash,
        port: u16,
        token: Vec<u8>,
    ) -> Result<(), DhtError> {
        let local_id = self.local_id().await;
        for attempt in 0..WRITE_QUERY_MAX_RETRIES {
            let args = DictBuilder::new()
                .insert("id", Value::bytes(local_id.to_bytestring()))
                .insert("info_hash", Value::bytes(infohash.to_vec()))
                .insert("port", Value::Int(i64::from(port)))
                .insert("implied_port", Value::Int(0))
                .insert("token", Value::bytes(token.clone()))
                .build();
            match self
                .send_query(
                    "announce_peer",
                    args,
                    contact.endpoint,
                    contact.id,
                    DEFAULT_TIMEOUT,
                )
                .await
            {
                Ok(Message::Response { .. }) => return Ok(()),
                Ok(Message::Error { code, description, .. }) => {
                    tracing::debug!(attempt, code, %description, "announce_peer rejected, retrying");
                }
                Ok(_) | Err(_) => {
                    tracing::debug!(attempt, endpoint = %contact.endpoint, "announce_peer attempt failed");
                }
            }
        }
        tracing::warn!(endpoint = %contact.endpoint, "announce_peer exhausted its retries");
        Err(DhtError::Timeout)
    }

    /// `tracker_announce`: re-runs `tracker_get_peers` and announces to
    /// every responding node with the token it returned (`spec.md` §4.4,
    /// scenario S3). Best-effort: failures are logged, never surfaced.
    pub async fn tracker_announce(
        self: &Arc<Self>,
        infohash: InfoHash,
        port: u16,
    ) -> Result<Vec<SocketAddr>, DhtError> {
        let (peers, tokens) = self.tracker_get_peers(infohash).await?;
        for (contact, token) in tokens {
            let _ = self.announce_to_node(contact, infohash, port, token).await;
        }
        Ok(peers)
    }

    /// Resolve `target` via BEP 44 `get`, stopping on the first
    /// signature/hash-valid immutable response, or collecting 8 valid
    /// mutable responses and keeping the highest `seq` (`spec.md` §4.4).
    pub async fn get_immutable(self: &Arc<Self>, target: NodeId) -> Result<Option<Value>, DhtError> {
        let state = self.state.lock().await;
        Self::require_initialized_sync(&state)?;
        let mut seed = state.routing_table.find_closest(&target, K);
        seed.extend(state.bootstrap_contacts.iter().copied());
        drop(state);

        let found = Arc::new(Mutex::new(None::<Value>));
        let this = Arc::clone(self);
        collect(target, seed, move |candidate| {
            let this = Arc::clone(&this);
            let found = Arc::clone(&found);
            async move {
                match this.query_get(candidate, target).await {
                    Ok((contacts, Some(GetValue::Immutable(value)))) => {
                        if crate::domain::immutable_key(&value) == target {
                            *found.lock().await = Some(value);
                            return EvalOutcome::Stop;
                        }
                        EvalOutcome::Candidates(contacts)
                    }
                    Ok((contacts, _)) => EvalOutcome::Candidates(contacts),
                    Err(_) => {
                        this.fail_contact(candidate).await;
                        EvalOutcome::Candidates(vec![])
                    }
                }
            }
        })
        .await;

        let found = Arc::try_unwrap(found).map(Mutex::into_inner).unwrap_or(None);
        Ok(found)
    }

    /// Resolve a mutable item by `(public_key, salt)`, collecting up to 8
    /// valid responses and keeping the one with the highest `seq`.
    pub async fn get_mutable(
        self: &Arc<Self>,
        public_key: [u8; 32],
        salt: Vec<u8>,
    ) -> Result<Option<MutableItem>, DhtError> {
        let target = crate::domain::mutable_key(&public_key, &salt);
        let state = self.state.lock().await;
        Self::require_initialized_sync(&state)?;
        let mut seed = state.routing_table.find_closest(&target, K);
        seed.extend(state.bootstrap_contacts.iter().copied());
        drop(state);

        let best = Arc::new(Mutex::new(None::<MutableItem>));
        let replies = Arc::new(AtomicUsize::new(0));
        let this = Arc::clone(self);
        collect(target, seed, move |candidate| {
            let this = Arc::clone(&this);
            let best = Arc::clone(&best);
            let replies = Arc::clone(&replies);
            async move {
                match this.query_get(candidate, target).await {
                    Ok((contacts, Some(GetValue::Mutable(item)))) => {
                        if item.verify().is_ok() {
                            replies.fetch_add(1, Ordering::SeqCst);
                            let mut best = best.lock().await;
                            if best.as_ref().map_or(true, |b| item.seq > b.seq) {
                                *best = Some(item);
                            }
                        }
                        if replies.load(Ordering::SeqCst) >= RESPONSIBLE_TRACKERS_PER_SWARM {
                            EvalOutcome::Stop
                        } else {
                            EvalOutcome::Candidates(contacts)
                        }
                    }
                    Ok((contacts, _)) => EvalOutcome::Candidates(contacts),
                    Err(_) => {
                        this.fail_contact(candidate).await;
                        EvalOutcome::Candidates(vec![])
                    }
                }
            }
        })
        .await;

        let best = Arc::try_unwrap(best).map(Mutex::into_inner).unwrap_or(None);
        Ok(best)
    }

    async fn query_get(
        self: &Arc<Self>,
        candidate: Contact,
        target: NodeId,
    ) -> Result<(Vec<Contact>, Option<GetValue>), DhtError> {
        let local_id = self.local_id().await;
        let args = DictBuilder::new()
            .insert("id", Value::bytes(local_id.to_bytestring()))
            .insert("target", Value::bytes(target.to_bytestring()))
            .build();
        let reply = self
            .send_query("get", args, candidate.endpoint, candidate.id, ROUTING_PROBE_TIMEOUT)
            .await?;
        match reply {
            Message::Response { r, .. } => {
                self.try_add_contact(candidate, true).await;
                let contacts = contacts_from_nodes_fields(&r);
                let value = match (r.get("k").and_then(Value::as_bytes), r.get("sig").and_then(Value::as_bytes)) {
                    (Some(k), Some(sig)) if k.len() == 32 && sig.len() == 64 => {
                        let mut public_key = [0u8; 32];
                        public_key.copy_from_slice(k);
                        let mut signature = [0u8; 64];
                        signature.copy_from_slice(sig);
                        let seq = r.get("seq").and_then(Value::as_int).unwrap_or(0);
                        let salt = r.get("salt").and_then(Value::as_bytes).map(|s| s.to_vec()).unwrap_or_default();
                        r.get("v").cloned().map(|value| {
                            GetValue::Mutable(MutableItem {
                                public_key,
                                salt,
                                seq,
                                signature,
                                value,
                            })
                        })
                    }
                    _ => r.get("v").cloned().map(GetValue::Immutable),
                };
                Ok((contacts, value))
            }
            _ => Err(DhtError::Protocol("get query failed".into())),
        }
    }

    /// Collect puts-tokens from the [`RESPONSIBLE_TRACKERS_PER_SWARM`]
    /// closest nodes to `target`, the same proximity-bounded shape
    /// `tracker_get_peers` uses for announce tokens (`spec.md` §4.4 "put":
    /// "proximity map ... terminate when the map is full").
    async fn collect_put_tokens(
        self: &Arc<Self>,
        target: NodeId,
    ) -> Vec<(Contact, Vec<u8>)> {
        let state = self.state.lock().await;
        let mut seed = state.routing_table.find_closest(&target, K);
        seed.extend(state.bootstrap_contacts.iter().copied());
        drop(state);

        let tokens = Arc::new(Mutex::new(Vec::<(Contact, Vec<u8>)>::new()));
        let this = Arc::clone(self);
        collect(target, seed, move |candidate| {
            let this = Arc::clone(&this);
            let tokens = Arc::clone(&tokens);
            async move {
                let local_id = this.local_id().await;
                let args = DictBuilder::new()
                    .insert("id", Value::bytes(local_id.to_bytestring()))
                    .insert("target", Value::bytes(target.to_bytestring()))
                    .build();
                match this
                    .send_query("get", args, candidate.endpoint, candidate.id, ROUTING_PROBE_TIMEOUT)
                    .await
                {
                    Ok(Message::Response { r, .. }) => {
                        this.try_add_contact(candidate, true).await;
                        let contacts = contacts_from_nodes_fields(&r);
                        if let Some(token) = r.get("token").and_then(Value::as_bytes) {
                            tokens.lock().await.push((candidate, token.to_vec()));
                        }
                        let count = tokens.lock().await.len();
                        if count >= RESPONSIBLE_TRACKERS_PER_SWARM {
                            EvalOutcome::Stop
                        } else {
                            EvalOutcome::Candidates(contacts)
                        }
                    }
                    _ => {
                        this.fail_contact(candidate).await;
                        EvalOutcome::Candidates(vec![])
                    }
                }
            }
        })
        .await;

        Arc::try_unwrap(tokens).map(Mutex::into_inner).unwrap_or_default()
    }

    async fn put_to_node(
        self: &Arc<Self>,
        contact: Contact,
        token: Vec<u8>,
        args_extra: Value,
    ) -> Result<(), DhtError> {
        let mut args_dict = match args_extra {
            Value::Dict(d) => d,
            _ => unreachable!("put args are always built as a dict"),
        };
        args_dict.insert(b"id".to_vec(), Value::bytes(self.local_id().await.to_bytestring()));
        args_dict.insert(b"token".to_vec(), Value::bytes(token));
        let args = Value::Dict(args_dict);

        for attempt in 0..WRITE_QUERY_MAX_RETRIES {
            match self
                .send_query("put", args.clone(), contact.endpoint, contact.id, DEFAULT_TIMEOUT)
                .await
            {
                Ok(Message::Response { .. }) => return Ok(()),
                Ok(Message::Error { code, description, .. }) => {
                    tracing::debug!(attempt, code, %description, "put rejected, retrying");
                }
                Ok(_) | Err(_) => {
                    tracing::debug!(attempt, endpoint = %contact.endpoint, "put attempt failed");
                }
            }
        }
        tracing::warn!(endpoint = %contact.endpoint, "put exhausted its retries");
        Err(DhtError::Timeout)
    }

    /// `data_put_immutable(v)`: store `value` under `SHA1(bencoded_value)`
    /// on the nodes responsible for that key. Best-effort like
    /// `tracker_announce`; returns the key regardless of how many of the
    /// responsible nodes actually accepted it (`spec.md` §4.4 "Write
    /// queries").
    pub async fn put_immutable(self: &Arc<Self>, value: Value) -> Result<NodeId, DhtError> {
        {
            let state = self.state.lock().await;
            Self::require_initialized_sync(&state)?;
        }
        let target = crate::domain::immutable_key(&value);
        let tokens = self.collect_put_tokens(target).await;
        for (contact, token) in tokens {
            let args = DictBuilder::new().insert("v", value.clone()).build();
            let _ = self.put_to_node(contact, token, args).await;
        }
        Ok(target)
    }

    /// `data_put_mutable(v, sk, salt, seq)`: sign and store a mutable item
    /// under `SHA1(public_key || salt)` on the nodes responsible for that
    /// key (`spec.md` §3 "MutableItem", §8 testable property 7).
    pub async fn put_mutable(
        self: &Arc<Self>,
        keypair: &shared_crypto::Ed25519KeyPair,
        salt: Vec<u8>,
        seq: i64,
        value: Value,
    ) -> Result<NodeId, DhtError> {
        {
            let state = self.state.lock().await;
            Self::require_initialized_sync(&state)?;
        }
        let public_key = *keypair.public_key().as_bytes();
        let payload = crate::domain::signing_payload(&salt, seq, &value);
        let signature = keypair.sign(&payload);
        let target = crate::domain::mutable_key(&public_key, &salt);

        let tokens = self.collect_put_tokens(target).await;
        for (contact, token) in tokens {
            let mut builder = DictBuilder::new()
                .insert("k", Value::bytes(public_key.to_vec()))
                .insert("seq", Value::Int(seq))
                .insert("sig", Value::bytes(signature.as_bytes().to_vec()))
                .insert("v", value.clone());
            if !salt.is_empty() {
                builder = builder.insert("salt", Value::bytes(salt.clone()));
            }
            let _ = self.put_to_node(contact, token, builder.build()).await;
        }
        Ok(target)
    }

    // -- incoming dispatch ------------------------------------------------

    /// Drives the single UDP receive loop (`spec.md` §4.1, §5 "Shared
    /// resources"). Runs until the socket errors, which is treated as a
    /// fatal condition the caller should act on.
    pub async fn run_receive_loop(self: &Arc<Self>) -> Result<(), DhtError> {
        loop {
            let (datagram, source) = self.network.receive().await?;
            let message = match Message::decode(&datagram) {
                Ok(message) => message,
                Err(_) => continue, // Protocol-class: dropped silently, spec.md §7
            };
            match message {
                Message::Query { t, q, a, read_only } => {
                    self.handle_query(t, q, a, read_only, source).await;
                }
                Message::Response { t, r } => {
                    let mut state = self.state.lock().await;
                    state.active_requests.resolve(&t, source, Message::response(t.clone(), r));
                }
                Message::Error { t, code, description } => {
                    let mut state = self.state.lock().await;
                    state
                        .active_requests
                        .resolve(&t, source, Message::error(t.clone(), code, description));
                }
            }
        }
    }

    async fn handle_query(self: &Arc<Self>, t: Vec<u8>, q: String, a: Value, read_only: bool, source: SocketAddr) {
        let sender_id = a.get("id").and_then(Value::as_bytes).and_then(NodeId::from_bytestring);
        if !read_only {
            if let Some(id) = sender_id {
                self.try_add_contact(Contact::new(source, id), false).await;
            }
        }

        let result = match q.as_str() {
            "ping" => self.handle_ping(source).await,
            "find_node" => self.handle_find_node(&a).await,
            "get_peers" => self.handle_get_peers(&a, source).await,
            "announce_peer" => self.handle_announce_peer(&a, source).await,
            "get" => self.handle_get(&a, source).await,
            "put" => self.handle_put(&a, source).await,
            other => Err(DhtError::MethodNotImplemented(other.to_string())),
        };

        match result {
            Ok(r) => {
                let message = Message::response(t, r);
                let _ = self.network.send(&message.encode(), source).await;
            }
            Err(err) => {
                if let Some((code, description)) = err.as_wire_error() {
                    let message = Message::error(t, code, description);
                    let _ = self.network.send(&message.encode(), source).await;
                } else if let Some(id) = sender_id {
                    self.fail_contact(Contact::new(source, id)).await;
                }
            }
        }
    }

    /// The reply carries the querier's observed address in `ip`, the
    /// BEP 42 extension `bootstrap` relies on to learn its own external
    /// endpoint from a single trusted seed.
    async fn handle_ping(&self, source: SocketAddr) -> Result<Value, DhtError> {
        let local_id = self.local_id().await;
        Ok(DictBuilder::new()
            .insert("id", Value::bytes(local_id.to_bytestring()))
            .insert("ip", Value::bytes(encode_endpoint(source)))
            .build())
    }

    async fn handle_find_node(&self, a: &Value) -> Result<Value, DhtError> {
        let target = read_field_id(a, "target")?;
        let state = self.state.lock().await;
        let local_id = state.local_id;
        let closest = state.routing_table.find_closest(&target, K);
        drop(state);
        Ok(nodes_response(local_id, &closest))
    }

    async fn handle_get_peers(&self, a: &Value, source: SocketAddr) -> Result<Value, DhtError> {
        let infohash_id = read_field_id(a, "info_hash")?;
        let infohash: InfoHash = *infohash_id.as_bytes();
        let now = self.time.now();
        let mut state = self.state.lock().await;
        let local_id = state.local_id;
        let closest = state.routing_table.find_closest(&infohash_id, K);
        let peers = state.tracker.list_peers(&infohash, 50, now);
        let token = state.tracker.issue_token(source.ip(), now);
        drop(state);

        let mut builder = DictBuilder::new()
            .insert("id", Value::bytes(local_id.to_bytestring()))
            .insert("token", Value::bytes(token));
        builder = add_nodes_fields(builder, &closest);
        if !peers.is_empty() {
            let values = peers.into_iter().map(|ep| Value::bytes(encode_endpoint(ep))).collect();
            builder = builder.insert("values", Value::List(values));
        }
        Ok(builder.build())
    }

    async fn handle_announce_peer(&self, a: &Value, source: SocketAddr) -> Result<Value, DhtError> {
        let infohash_id = read_field_id(a, "info_hash")?;
        let infohash: InfoHash = *infohash_id.as_bytes();
        let token = a.get("token").and_then(Value::as_bytes).ok_or_else(|| DhtError::Protocol("announce_peer missing token".into()))?;
        let now = self.time.now();

        let mut state = self.state.lock().await;
        if !state.tracker.verify_token(source.ip(), now, token) {
            return Err(DhtError::BadToken);
        }
        if !is_responsible_for(&state.routing_table, &infohash_id) {
            return Err(DhtError::NotResponsible);
        }
        let implied_port = a.get("implied_port").and_then(Value::as_int).unwrap_or(0) == 1;
        let port = if implied_port {
            source.port()
        } else {
            a.get("port").and_then(Value::as_int).unwrap_or(0) as u16
        };
        let local_id = state.local_id;
        state.tracker.add_peer(infohash, SocketAddr::new(source.ip(), port), now);
        drop(state);
        Ok(id_dict(local_id))
    }

    async fn handle_get(&self, a: &Value, source: SocketAddr) -> Result<Value, DhtError> {
        let target = read_field_id(a, "target")?;
        let now = self.time.now();
        let mut state = self.state.lock().await;
        let local_id = state.local_id;
        let closest = state.routing_table.find_closest(&target, K);
        let token = state.tracker.issue_token(source.ip(), now);

        let mut builder = DictBuilder::new()
            .insert("id", Value::bytes(local_id.to_bytestring()))
            .insert("token", Value::bytes(token));
        builder = add_nodes_fields(builder, &closest);

        if let Some(item) = state.mutable_store.get(&target).cloned() {
            drop(state);
            builder = builder
                .insert("v", item.value)
                .insert("seq", Value::Int(item.seq))
                .insert("k", Value::bytes(item.public_key.to_vec()))
                .insert("sig", Value::bytes(item.signature.to_vec()));
            if !item.salt.is_empty() {
                builder = builder.insert("salt", Value::bytes(item.salt));
            }
        } else if let Some(value) = state.immutable_store.get(&target).cloned() {
            drop(state);
            builder = builder.insert("v", value);
        }
        Ok(builder.build())
    }

    async fn handle_put(&self, a: &Value, source: SocketAddr) -> Result<Value, DhtError> {
        let token = a.get("token").and_then(Value::as_bytes).ok_or_else(|| DhtError::Protocol("put missing token".into()))?;
        let now = self.time.now();
        let value = a.get("v").cloned().ok_or_else(|| DhtError::Protocol("put missing value".into()))?;

        let mut state = self.state.lock().await;
        if !state.tracker.verify_token(source.ip(), now, token) {
            return Err(DhtError::BadToken);
        }
        let local_id = state.local_id;

        match (a.get("k").and_then(Value::as_bytes), a.get("sig").and_then(Value::as_bytes)) {
            (Some(k), Some(sig)) if k.len() == 32 && sig.len() == 64 => {
                let mut public_key = [0u8; 32];
                public_key.copy_from_slice(k);
                let mut signature = [0u8; 64];
                signature.copy_from_slice(sig);
                let seq = a.get("seq").and_then(Value::as_int).unwrap_or(0);
                let salt = a.get("salt").and_then(Value::as_bytes).map(|s| s.to_vec()).unwrap_or_default();
                let item = MutableItem {
                    public_key,
                    salt,
                    seq,
                    signature,
                    value,
                };
                let key = item.key();
                let existing = state.mutable_store.get(&key).cloned();
                item.authenticate(existing.as_ref())?;
                state.mutable_store.insert(key, item);
            }
            _ => {
                let key = crate::domain::immutable_key(&value);
                state.immutable_store.insert(key, value);
            }
        }
        Ok(id_dict(local_id))
    }

    // -- bootstrap --------------------------------------------------------

    /// `spec.md` §4.4 "Bootstrap". Failures abort the node: it stays
    /// un-initialized and every user operation fails with
    /// [`DhtError::NotInitialized`].
    pub async fn bootstrap(self: &Arc<Self>, host: SocketAddr) -> Result<(), DhtError> {
        let probe_id = NodeId::random();
        let args = DictBuilder::new().insert("id", Value::bytes(probe_id.to_bytestring())).build();
        let reply = self
            .send_query("ping", args, host, None, BOOTSTRAP_TIMEOUT)
            .await?;
        let r = match reply {
            Message::Response { r, .. } => r,
            _ => return Err(DhtError::Protocol("bootstrap ping did not succeed".into())),
        };
        let ip_bytes = r
            .get("ip")
            .and_then(Value::as_bytes)
            .ok_or_else(|| DhtError::Protocol("bootstrap reply missing external ip".into()))?;
        let external = decode_endpoint(ip_bytes)
            .ok_or_else(|| DhtError::Protocol("bootstrap reply has a malformed ip field".into()))?;
        let local_id = NodeId::generate(external.ip());

        {
            let mut state = self.state.lock().await;
            state.local_id = local_id;
            state.routing_table = RoutingTable::new(local_id);
            state.bootstrap_contacts = vec![Contact::seed(host)];
        }

        let seed = vec![Contact::seed(host)];
        self.find_node_inner(local_id, seed).await;

        let ranges = self.state.lock().await.routing_table.bucket_ranges();
        for range in ranges {
            let target = range.random_id();
            let seed = {
                let state = self.state.lock().await;
                let mut seed = state.routing_table.find_closest(&target, K);
                seed.extend(state.bootstrap_contacts.iter().copied());
                seed
            };
            self.find_node_inner(target, seed).await;
        }

        self.state.lock().await.initialized = true;
        tracing::info!(%local_id, "DHT node bootstrap complete");
        Ok(())
    }
}

enum GetValue {
    Immutable(Value),
    Mutable(MutableItem),
}

fn read_id(r: &Value) -> Result<NodeId, DhtError> {
    r.get("id")
        .and_then(Value::as_bytes)
        .and_then(NodeId::from_bytestring)
        .ok_or_else(|| DhtError::Protocol("reply missing a 20-byte id".into()))
}

fn read_field_id(a: &Value, field: &str) -> Result<NodeId, DhtError> {
    a.get(field)
        .and_then(Value::as_bytes)
        .and_then(NodeId::from_bytestring)
        .ok_or_else(|| DhtError::Protocol(format!("query missing 20-byte field {field}")))
}

fn id_dict(local_id: NodeId) -> Value {
    DictBuilder::new().insert("id", Value::bytes(local_id.to_bytestring())).build()
}

fn nodes_response(local_id: NodeId, closest: &[Contact]) -> Value {
    let builder = DictBuilder::new().insert("id", Value::bytes(local_id.to_bytestring()));
    add_nodes_fields(builder, closest).build()
}

fn add_nodes_fields(mut builder: DictBuilder, closest: &[Contact]) -> DictBuilder {
    let with_ids: Vec<(NodeId, SocketAddr)> = closest.iter().filter_map(|c| c.id.map(|id| (id, c.endpoint))).collect();
    let v4 = encode_nodes_v4(&with_ids);
    if !v4.is_empty() {
        builder = builder.insert("nodes", Value::bytes(v4));
    }
    let v6 = encode_nodes_v6(&with_ids);
    if !v6.is_empty() {
        builder = builder.insert("nodes6", Value::bytes(v6));
    }
    builder
}

fn contacts_from_nodes_fields(r: &Value) -> Vec<Contact> {
    let mut contacts = Vec::new();
    if let Some(nodes) = r.get("nodes").and_then(Value::as_bytes) {
        contacts.extend(decode_nodes_v4(nodes).into_iter().map(|(id, addr)| Contact::new(addr, id)));
    }
    if let Some(nodes6) = r.get("nodes6").and_then(Value::as_bytes) {
        contacts.extend(decode_nodes_v6(nodes6).into_iter().map(|(id, addr)| Contact::new(addr, id)));
    }
    contacts
}

/// Cheap "am I responsible" check from `spec.md` §4.4: accept unless the
/// local node is clearly not among the closest-known nodes to `key`.
fn is_responsible_for(routing_table: &RoutingTable, key: &NodeId) -> bool {
    let closest = routing_table.find_closest(key, RESPONSIBLE_TRACKERS_PER_SWARM * 4);
    if closest.len() < RESPONSIBLE_TRACKERS_PER_SWARM * 4 {
        return true;
    }
    let local_id = routing_table.local_id();
    closest
        .iter()
        .filter_map(|c| c.id)
        .all(|id| !closer_to(key, &id, &local_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FixedTimeSource, MultiplexerNetwork};
    use ouinet_02_multiplexer::Multiplexer;
    use std::net::{IpAddr, Ipv4Addr};

    async fn spawn_node(clock: u64) -> (Arc<DhtNode<MultiplexerNetwork, FixedTimeSource>>, SocketAddr) {
        let multiplexer = Multiplexer::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let addr = multiplexer.local_addr().unwrap();
        let node = DhtNode::new(MultiplexerNetwork::new(multiplexer), FixedTimeSource(clock));
        let receiver = Arc::clone(&node);
        tokio::spawn(async move {
            let _ = receiver.run_receive_loop().await;
        });
        (node, addr)
    }

    #[tokio::test]
    async fn ping_learns_the_remote_nodes_identity() {
        let (node_a, _addr_a) = spawn_node(0).await;
        let (node_b, addr_b) = spawn_node(0).await;

        let remote_id = node_a.ping(addr_b).await.unwrap();
        assert_eq!(remote_id, node_b.local_id().await);
    }

    #[tokio::test]
    async fn ping_reports_the_querys_observed_address() {
        let (node_a, addr_a) = spawn_node(0).await;
        let (node_b, addr_b) = spawn_node(0).await;

        node_a.ping(addr_b).await.unwrap();
        // node_b must have seen node_a's query arrive from addr_a; assert
        // indirectly via a second ping succeeding (routing state intact).
        assert!(node_b.ping(addr_a).await.is_ok());
    }

    #[tokio::test]
    async fn bootstrap_derives_an_address_constrained_identity_and_initializes() {
        let (seed, seed_addr) = spawn_node(0).await;
        let (joining, _addr) = spawn_node(0).await;

        assert!(!joining.is_initialized().await);
        joining.bootstrap(seed_addr).await.unwrap();
        assert!(joining.is_initialized().await);

        // Learned identity should differ from the random placeholder and
        // should itself be discoverable by the seed.
        let joining_id = joining.local_id().await;
        assert_ne!(joining_id, NodeId::zero());
        let found = seed.find_node(joining_id).await.unwrap();
        assert!(found.iter().any(|c| c.id == Some(joining_id)));
    }

    #[tokio::test]
    async fn tracker_announce_then_get_peers_round_trips() {
        let (seed, seed_addr) = spawn_node(1_000).await;
        let (announcer, _) = spawn_node(1_000).await;
        let (searcher, _) = spawn_node(1_000).await;

        announcer.bootstrap(seed_addr).await.unwrap();
        searcher.bootstrap(seed_addr).await.unwrap();

        let infohash: InfoHash = [0x42u8; 20];
        let announced = announcer.tracker_announce(infohash, 6881).await.unwrap();
        // tracker_get_peers returns whatever was already stored; on the
        // first announce nobody has peers yet, so this is empty.
        assert!(announced.is_empty());

        let (peers, _tokens) = searcher.tracker_get_peers(infohash).await.unwrap();
        assert!(peers.iter().any(|p| p.port() == 6881));
    }

    #[tokio::test]
    async fn get_and_put_immutable_round_trips() {
        let (seed, seed_addr) = spawn_node(0).await;
        let (publisher, _) = spawn_node(0).await;
        let (reader, _) = spawn_node(0).await;

        publisher.bootstrap(seed_addr).await.unwrap();
        reader.bootstrap(seed_addr).await.unwrap();

        let value = Value::bytes(b"hello ouinet".to_vec());
        let target = publisher.put_immutable(value.clone()).await.unwrap();
        assert_eq!(target, crate::domain::immutable_key(&value));

        let found = reader.get_immutable(target).await.unwrap();
        assert_eq!(found, Some(value));
    }

    /// `spec.md` §8 scenario S4: put seq=1, get it back, reject a lower
    /// seq, then replace with a higher one.
    #[tokio::test]
    async fn mutable_put_get_round_trip_rejects_lower_seq() {
        use shared_crypto::Ed25519KeyPair;

        let (seed, seed_addr) = spawn_node(0).await;
        let (publisher, _) = spawn_node(0).await;
        let (reader, _) = spawn_node(0).await;

        publisher.bootstrap(seed_addr).await.unwrap();
        reader.bootstrap(seed_addr).await.unwrap();

        let keypair = Ed25519KeyPair::from_seed([3u8; 32]);
        let public_key = *keypair.public_key().as_bytes();

        publisher
            .put_mutable(&keypair, Vec::new(), 1, Value::Int(42))
            .await
            .unwrap();
        let fetched = reader.get_mutable(public_key, Vec::new()).await.unwrap().unwrap();
        assert_eq!(fetched.seq, 1);
        assert_eq!(fetched.value, Value::Int(42));

        // seq=0 < stored seq=1: every responsible node rejects it, so the
        // stored record is unchanged.
        publisher
            .put_mutable(&keypair, Vec::new(), 0, Value::Int(43))
            .await
            .unwrap();
        let unchanged = reader.get_mutable(public_key, Vec::new()).await.unwrap().unwrap();
        assert_eq!(unchanged.seq, 1);
        assert_eq!(unchanged.value, Value::Int(42));

        publisher
            .put_mutable(&keypair, Vec::new(), 2, Value::Int(43))
            .await
            .unwrap();
        let replaced = reader.get_mutable(public_key, Vec::new()).await.unwrap().unwrap();
        assert_eq!(replaced.seq, 2);
        assert_eq!(replaced.value, Value::Int(43));
    }
}
