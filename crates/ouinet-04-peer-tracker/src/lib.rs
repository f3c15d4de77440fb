//! # Peer Tracker
//!
//! Per-infohash record of announced TCP peer endpoints, plus token issuance
//! for `announce_peer` authentication.
//!
//! Reference: `spec.md` §3 "TrackerEntry", §4.3 "Peer Tracker".

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

/// A 160-bit infohash identifying a torrent swarm.
pub type InfoHash = [u8; 20];

/// Peer entries expire after 30 minutes of no refresh.
pub const PEER_EXPIRY_SECS: u64 = 30 * 60;
/// Tokens rotate on a 5-minute epoch and remain valid for two rotations.
pub const TOKEN_EPOCH_SECS: u64 = 5 * 60;

type HmacSha256 = Hmac<Sha256>;

struct PeerRecord {
    endpoint: SocketAddr,
    last_announced: u64,
}

/// Per-infohash peer set with lazily-expired entries, plus a keyed-hash
/// token issuer shared across all swarms.
pub struct PeerTracker {
    swarms: HashMap<InfoHash, Vec<PeerRecord>>,
    token_secret: [u8; 32],
}

impl PeerTracker {
    /// Build a tracker with a fresh random token secret (the secret never
    /// needs to be persisted: tokens only need to outlive two 5-minute
    /// epochs, `spec.md` §3).
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self {
            swarms: HashMap::new(),
            token_secret: secret,
        }
    }

    /// Record that `endpoint` announced itself under `infohash` at `now`.
    pub fn add_peer(&mut self, infohash: InfoHash, endpoint: SocketAddr, now: u64) {
        let peers = self.swarms.entry(infohash).or_default();
        if let Some(existing) = peers.iter_mut().find(|p| p.endpoint == endpoint) {
            existing.last_announced = now;
            return;
        }
        peers.push(PeerRecord {
            endpoint,
            last_announced: now,
        });
    }

    /// A sample of up to `limit` live peers for `infohash`, purging expired
    /// entries first (expiry is lazy, checked on read; `spec.md` §3).
    pub fn list_peers(&mut self, infohash: &InfoHash, limit: usize, now: u64) -> Vec<SocketAddr> {
        let Some(peers) = self.swarms.get_mut(infohash) else {
            return Vec::new();
        };
        peers.retain(|p| now.saturating_sub(p.last_announced) <= PEER_EXPIRY_SECS);
        peers.iter().take(limit).map(|p| p.endpoint).collect()
    }

    fn epoch(now: u64) -> u64 {
        now / TOKEN_EPOCH_SECS
    }

    fn mac_for(&self, ip: IpAddr, epoch: u64) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.token_secret)
            .expect("HMAC accepts a key of any length");
        match ip {
            IpAddr::V4(v4) => mac.update(&v4.octets()),
            IpAddr::V6(v6) => mac.update(&v6.octets()),
        }
        mac.update(&epoch.to_be_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// A token for `ip`, valid for the current epoch (and the previous one,
    /// checked by [`PeerTracker::verify_token`]).
    pub fn issue_token(&self, ip: IpAddr, now: u64) -> Vec<u8> {
        self.mac_for(ip, Self::epoch(now))
    }

    /// Tokens are valid for the current epoch and the one before it, giving
    /// roughly a 5-10 minute validity window.
    pub fn verify_token(&self, ip: IpAddr, now: u64, token: &[u8]) -> bool {
        let epoch = Self::epoch(now);
        let current = self.mac_for(ip, epoch);
        let previous = self.mac_for(ip, epoch.saturating_sub(1));
        constant_time_eq(&current, token) || constant_time_eq(&previous, token)
    }
}

impl Default for PeerTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn endpoint(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), port)
    }

    #[test]
    fn add_and_list_round_trips() {
        let mut tracker = PeerTracker::new();
        let infohash = [1u8; 20];
        tracker.add_peer(infohash, endpoint(6881), 0);
        tracker.add_peer(infohash, endpoint(6882), 0);
        let peers = tracker.list_peers(&infohash, 50, 0);
        assert_eq!(peers.len(), 2);
    }

    #[test]
    fn peers_expire_after_thirty_minutes() {
        let mut tracker = PeerTracker::new();
        let infohash = [2u8; 20];
        tracker.add_peer(infohash, endpoint(6881), 0);
        let still_alive = tracker.list_peers(&infohash, 50, PEER_EXPIRY_SECS);
        assert_eq!(still_alive.len(), 1);
        let expired = tracker.list_peers(&infohash, 50, PEER_EXPIRY_SECS + 1);
        assert!(expired.is_empty());
    }

    #[test]
    fn token_round_trips_within_current_epoch() {
        let tracker = PeerTracker::new();
        let ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));
        let token = tracker.issue_token(ip, 1_000_000);
        assert!(tracker.verify_token(ip, 1_000_000, &token));
    }

    #[test]
    fn token_remains_valid_one_epoch_later() {
        let tracker = PeerTracker::new();
        let ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));
        let token = tracker.issue_token(ip, 1_000_000);
        assert!(tracker.verify_token(ip, 1_000_000 + TOKEN_EPOCH_SECS, &token));
    }

    #[test]
    fn token_expires_after_two_epochs() {
        let tracker = PeerTracker::new();
        let ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));
        let token = tracker.issue_token(ip, 1_000_000);
        assert!(!tracker.verify_token(ip, 1_000_000 + 2 * TOKEN_EPOCH_SECS, &token));
    }

    #[test]
    fn token_is_specific_to_the_announcing_ip() {
        let tracker = PeerTracker::new();
        let ip_a = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5));
        let ip_b = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 6));
        let token = tracker.issue_token(ip_a, 0);
        assert!(!tracker.verify_token(ip_b, 0, &token));
    }
}
