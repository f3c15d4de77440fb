//! 160-bit node identifiers and the Kademlia XOR metric.
//!
//! Reference: `spec.md` §3 "NodeID"; BEP 42 for address-constrained
//! generation (`examples/original_source/src/bittorrent/node_id.h` confirms
//! the `Range { stencil, mask }` shape reused here).

use std::fmt;
use std::net::IpAddr;
use std::sync::OnceLock;

/// Number of bytes in a node identifier (160 bits).
pub const ID_LEN: usize = 20;

/// A 160-bit Kademlia node identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; ID_LEN]);

impl NodeId {
    /// All-zero identifier, used as a sentinel in tests.
    pub fn zero() -> Self {
        Self([0u8; ID_LEN])
    }

    /// Build from raw bytes.
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw byte view.
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Read bit `n`, indexed from the most significant bit (`n == 0` is the
    /// top bit of byte 0).
    pub fn bit(&self, n: usize) -> bool {
        let byte = self.0[n / 8];
        let shift = 7 - (n % 8);
        (byte >> shift) & 1 == 1
    }

    /// Set bit `n`, indexed from the most significant bit.
    pub fn set_bit(&mut self, n: usize, value: bool) {
        let shift = 7 - (n % 8);
        if value {
            self.0[n / 8] |= 1 << shift;
        } else {
            self.0[n / 8] &= !(1 << shift);
        }
    }

    /// Number of leading bits shared with `other` (i.e. the bucket index a
    /// Kademlia routing table would place `other` in, relative to `self`).
    pub fn common_prefix_len(&self, other: &NodeId) -> usize {
        for i in 0..ID_LEN {
            let x = self.0[i] ^ other.0[i];
            if x != 0 {
                return i * 8 + x.leading_zeros() as usize;
            }
        }
        ID_LEN * 8
    }

    /// Lowercase hex serialization.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(ID_LEN * 2);
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    /// Raw 20-byte serialization used on the wire and as bencode dict values.
    pub fn to_bytestring(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Inverse of [`NodeId::to_bytestring`]. Fails if `bytes` isn't exactly
    /// 20 bytes long.
    pub fn from_bytestring(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != ID_LEN {
            return None;
        }
        let mut buf = [0u8; ID_LEN];
        buf.copy_from_slice(bytes);
        Some(Self(buf))
    }

    /// A uniformly random node identifier.
    pub fn random() -> Self {
        let mut buf = [0u8; ID_LEN];
        rand::Rng::fill(&mut rand::thread_rng(), &mut buf);
        Self(buf)
    }

    /// Derive a BEP 42 address-constrained node identifier: the top bits are
    /// a CRC32C of the (masked) external address plus a random 3-bit nonce,
    /// so a node cannot freely pick an arbitrary identifier.
    pub fn generate(address: IpAddr) -> Self {
        let nonce = rand::Rng::gen_range(&mut rand::thread_rng(), 0u8..8);
        Self::generate_with_nonce(address, nonce)
    }

    /// Testable variant of [`NodeId::generate`] with an explicit nonce.
    pub fn generate_with_nonce(address: IpAddr, nonce: u8) -> Self {
        let nonce = nonce & 0x7;
        let masked = match address {
            IpAddr::V4(v4) => {
                let mut octets = v4.octets();
                const MASK: [u8; 4] = [0x03, 0x0f, 0x3f, 0xff];
                for i in 0..4 {
                    octets[i] &= MASK[i];
                }
                octets[0] |= nonce << 5;
                octets.to_vec()
            }
            IpAddr::V6(v6) => {
                let mut octets = v6.octets();
                const MASK: [u8; 8] = [0x01, 0x03, 0x07, 0x0f, 0x1f, 0x3f, 0x7f, 0xff];
                for i in 0..8 {
                    octets[i] &= MASK[i];
                }
                octets[0] |= nonce << 5;
                octets[..8].to_vec()
            }
        };

        let crc = crc32c(&masked);
        let mut id = [0u8; ID_LEN];
        id[0] = (crc >> 24) as u8;
        id[1] = (crc >> 16) as u8;
        id[2] = ((crc >> 8) as u8 & 0xf8) | rand::Rng::gen_range(&mut rand::thread_rng(), 0u8..8);
        for b in id.iter_mut().skip(3).take(16) {
            *b = rand::Rng::gen(&mut rand::thread_rng());
        }
        id[19] = nonce;
        Self(id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// XOR distance between two identifiers, as a big-endian 160-bit magnitude.
///
/// Byte-wise XOR preserves ordering when compared as a big-endian number,
/// so `Distance` derives `Ord` and `closer_to` just compares two instances.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance(pub [u8; ID_LEN]);

/// Compute the XOR distance `d(a, b)`.
pub fn xor_distance(a: &NodeId, b: &NodeId) -> Distance {
    let mut out = [0u8; ID_LEN];
    for i in 0..ID_LEN {
        out[i] = a.0[i] ^ b.0[i];
    }
    Distance(out)
}

/// `true` if `a` is strictly closer to `target` than `b` is.
///
/// `spec.md` §8 testable property 3: this is a strict total order over
/// distinct ids, and `d(a, b) == d(b, a)`, `d(a, a) == 0`.
pub fn closer_to(target: &NodeId, a: &NodeId, b: &NodeId) -> bool {
    xor_distance(target, a) < xor_distance(target, b)
}

/// An identifier prefix: a stencil value plus the number of significant
/// leading bits (`mask`). Used to draw a uniform identifier within a k-bucket
/// or routing-subtree's range.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Range {
    pub stencil: [u8; ID_LEN],
    pub mask: usize,
}

impl Range {
    /// The range covering every possible identifier.
    pub fn max() -> Self {
        Self {
            stencil: [0u8; ID_LEN],
            mask: 0,
        }
    }

    /// Narrow this range by fixing one more bit to `bit`.
    pub fn reduce(&self, bit: bool) -> Self {
        let mut stencil = self.stencil;
        if bit {
            let byte = self.mask / 8;
            let shift = 7 - (self.mask % 8);
            stencil[byte] |= 1 << shift;
        }
        Self {
            stencil,
            mask: self.mask + 1,
        }
    }

    /// Does `id` fall within this range (agrees with the stencil on the
    /// first `mask` bits)?
    pub fn contains(&self, id: &NodeId) -> bool {
        for i in 0..self.mask {
            let byte = i / 8;
            let shift = 7 - (i % 8);
            if ((self.stencil[byte] >> shift) & 1) != ((id.0[byte] >> shift) & 1) {
                return false;
            }
        }
        true
    }

    /// Draw a uniformly random identifier within this range.
    pub fn random_id(&self) -> NodeId {
        let mut id = NodeId::random();
        for i in 0..self.mask {
            let byte = i / 8;
            let shift = 7 - (i % 8);
            let bit = (self.stencil[byte] >> shift) & 1 == 1;
            id.set_bit(i, bit);
        }
        id
    }
}

fn crc32c_table() -> &'static [u32; 256] {
    static TABLE: OnceLock<[u32; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        const POLY: u32 = 0x82f6_3b78;
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                crc = if crc & 1 == 1 {
                    (crc >> 1) ^ POLY
                } else {
                    crc >> 1
                };
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    })
}

/// CRC32C (Castagnoli) checksum, as required by BEP 42's id-derivation rule.
fn crc32c(data: &[u8]) -> u32 {
    let table = crc32c_table();
    let mut crc = 0xffff_ffffu32;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xff) as usize;
        crc = (crc >> 8) ^ table[idx];
    }
    !crc
}
