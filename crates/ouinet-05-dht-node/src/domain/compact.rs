//! Compact contact encoding used in `nodes`, `nodes6`, and `values`.
//!
//! Reference: `spec.md` §6 "DHT wire format"; §8 testable property 6.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use ouinet_01_identity::{NodeId, ID_LEN};

/// Encode a single IPv4 endpoint as `ip(4) || port_be(2)`.
pub fn encode_endpoint_v4(addr: SocketAddr) -> [u8; 6] {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => panic!("encode_endpoint_v4 called with a v6 address"),
    };
    let mut out = [0u8; 6];
    out[..4].copy_from_slice(&ip.octets());
    out[4..].copy_from_slice(&addr.port().to_be_bytes());
    out
}

/// Decode a single IPv4 endpoint.
pub fn decode_endpoint_v4(bytes: &[u8]) -> Option<SocketAddr> {
    if bytes.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Encode a single IPv6 endpoint as `ip(16) || port_be(2)`.
pub fn encode_endpoint_v6(addr: SocketAddr) -> [u8; 18] {
    let ip = match addr.ip() {
        IpAddr::V6(v6) => v6,
        IpAddr::V4(_) => panic!("encode_endpoint_v6 called with a v4 address"),
    };
    let mut out = [0u8; 18];
    out[..16].copy_from_slice(&ip.octets());
    out[16..].copy_from_slice(&addr.port().to_be_bytes());
    out
}

/// Decode a single IPv6 endpoint.
pub fn decode_endpoint_v6(bytes: &[u8]) -> Option<SocketAddr> {
    if bytes.len() != 18 {
        return None;
    }
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&bytes[..16]);
    let ip = Ipv6Addr::from(octets);
    let port = u16::from_be_bytes([bytes[16], bytes[17]]);
    Some(SocketAddr::new(IpAddr::V6(ip), port))
}

/// Encode an endpoint, dispatching on its address family.
pub fn encode_endpoint(addr: SocketAddr) -> Vec<u8> {
    match addr {
        SocketAddr::V4(_) => encode_endpoint_v4(addr).to_vec(),
        SocketAddr::V6(_) => encode_endpoint_v6(addr).to_vec(),
    }
}

/// Decode an endpoint, picking the format by byte length (6 for v4, 18 for
/// v6).
pub fn decode_endpoint(bytes: &[u8]) -> Option<SocketAddr> {
    match bytes.len() {
        6 => decode_endpoint_v4(bytes),
        18 => decode_endpoint_v6(bytes),
        _ => None,
    }
}

/// Pack `id(20) || compact_endpoint` for every v4 contact with a known id,
/// for the `nodes` field of a `find_node`/`get_peers` response.
pub fn encode_nodes_v4(contacts: &[(NodeId, SocketAddr)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(contacts.len() * (ID_LEN + 6));
    for (id, addr) in contacts.iter().filter(|(_, a)| a.is_ipv4()) {
        out.extend_from_slice(id.as_bytes());
        out.extend_from_slice(&encode_endpoint_v4(*addr));
    }
    out
}

/// Decode a `nodes` field into `(id, endpoint)` pairs, ignoring any
/// trailing partial record.
pub fn decode_nodes_v4(bytes: &[u8]) -> Vec<(NodeId, SocketAddr)> {
    decode_compact_nodes(bytes, ID_LEN + 6, decode_endpoint_v4)
}

/// Pack `id(20) || compact_endpoint` for every v6 contact, for `nodes6`.
pub fn encode_nodes_v6(contacts: &[(NodeId, SocketAddr)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(contacts.len() * (ID_LEN + 18));
    for (id, addr) in contacts.iter().filter(|(_, a)| a.is_ipv6()) {
        out.extend_from_slice(id.as_bytes());
        out.extend_from_slice(&encode_endpoint_v6(*addr));
    }
    out
}

/// Decode a `nodes6` field into `(id, endpoint)` pairs.
pub fn decode_nodes_v6(bytes: &[u8]) -> Vec<(NodeId, SocketAddr)> {
    decode_compact_nodes(bytes, ID_LEN + 18, decode_endpoint_v6)
}

fn decode_compact_nodes(
    bytes: &[u8],
    record_len: usize,
    decode_addr: impl Fn(&[u8]) -> Option<SocketAddr>,
) -> Vec<(NodeId, SocketAddr)> {
    bytes
        .chunks_exact(record_len)
        .filter_map(|record| {
            let id = NodeId::from_bytestring(&record[..ID_LEN])?;
            let addr = decode_addr(&record[ID_LEN..])?;
            Some((id, addr))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn v4_endpoint_round_trips() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 6881);
        assert_eq!(decode_endpoint(&encode_endpoint(addr)), Some(addr));
    }

    #[test]
    fn v6_endpoint_round_trips() {
        let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)), 6881);
        assert_eq!(decode_endpoint(&encode_endpoint(addr)), Some(addr));
    }

    #[test]
    fn nodes_v4_round_trips() {
        let id = NodeId::random();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 1234);
        let encoded = encode_nodes_v4(&[(id, addr)]);
        let decoded = decode_nodes_v4(&encoded);
        assert_eq!(decoded, vec![(id, addr)]);
    }
}
