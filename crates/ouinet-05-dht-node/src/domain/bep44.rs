//! BEP 44 immutable/mutable data items.
//!
//! Reference: `spec.md` §3 "ImmutableItem / MutableItem"; §8 testable
//! property 7 "Mutable-data signing".

use ouinet_01_identity::{NodeId, Value};
use sha1::{Digest, Sha1};
use shared_crypto::signatures::{Ed25519PublicKey, Ed25519Signature};

use super::errors::DhtError;

/// `SHA1(bencoded_value)`.
pub fn immutable_key(value: &Value) -> NodeId {
    let digest = Sha1::digest(value.encode());
    NodeId::from_bytestring(&digest).expect("SHA1 output is exactly 20 bytes")
}

/// `SHA1(public_key || salt)`.
pub fn mutable_key(public_key: &[u8; 32], salt: &[u8]) -> NodeId {
    let mut hasher = Sha1::new();
    hasher.update(public_key);
    hasher.update(salt);
    let digest = hasher.finalize();
    NodeId::from_bytestring(&digest).expect("SHA1 output is exactly 20 bytes")
}

/// The exact byte string a mutable item's signature covers:
/// `"4:salt" len ":" salt "3:seqi" seq "e1:v" bencoded_value`, with the
/// `salt` clause omitted entirely when the salt is empty.
pub fn signing_payload(salt: &[u8], seq: i64, value: &Value) -> Vec<u8> {
    let mut payload = Vec::new();
    if !salt.is_empty() {
        payload.extend_from_slice(format!("4:salt{}:", salt.len()).as_bytes());
        payload.extend_from_slice(salt);
    }
    payload.extend_from_slice(format!("3:seqi{}e1:v", seq).as_bytes());
    payload.extend_from_slice(&value.encode());
    payload
}

/// A value stored under its immutable (hash-derived) key.
#[derive(Debug, Clone)]
pub struct ImmutableItem {
    pub value: Value,
}

impl ImmutableItem {
    /// Authenticate a `put` for an immutable item: the claimed key must
    /// match the hash of the value.
    pub fn authenticate(claimed_key: &NodeId, value: Value) -> Result<Self, DhtError> {
        if immutable_key(&value) != *claimed_key {
            return Err(DhtError::ValueKeyMismatch);
        }
        Ok(Self { value })
    }
}

/// A value stored under its mutable (public-key-derived) key, signed by the
/// corresponding private key.
#[derive(Debug, Clone)]
pub struct MutableItem {
    pub public_key: [u8; 32],
    pub salt: Vec<u8>,
    pub seq: i64,
    pub signature: [u8; 64],
    pub value: Value,
}

impl MutableItem {
    pub fn key(&self) -> NodeId {
        mutable_key(&self.public_key, &self.salt)
    }

    /// Verify the Ed25519 signature over this item's exact signing payload.
    pub fn verify(&self) -> Result<(), DhtError> {
        let public_key =
            Ed25519PublicKey::from_bytes(self.public_key).map_err(|_| DhtError::BadSignature)?;
        let signature = Ed25519Signature::from_bytes(self.signature);
        let payload = signing_payload(&self.salt, self.seq, &self.value);
        public_key
            .verify(&payload, &signature)
            .map_err(|_| DhtError::BadSignature)
    }

    /// Authenticate an incoming `put` against whatever is currently stored
    /// (if anything): the signature must verify, and `seq` must be
    /// monotonically non-decreasing; if equal, the value must be unchanged
    /// (`spec.md` §3).
    pub fn authenticate(&self, existing: Option<&MutableItem>) -> Result<(), DhtError> {
        self.verify()?;
        if let Some(existing) = existing {
            if self.seq < existing.seq {
                return Err(DhtError::SeqTooLow);
            }
            if self.seq == existing.seq && self.value.encode() != existing.value.encode() {
                return Err(DhtError::SeqTooLow);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::signatures::Ed25519KeyPair;

    fn sign_item(keypair: &Ed25519KeyPair, salt: &[u8], seq: i64, value: Value) -> MutableItem {
        let payload = signing_payload(salt, seq, &value);
        let signature = keypair.sign(&payload);
        MutableItem {
            public_key: *keypair.public_key().as_bytes(),
            salt: salt.to_vec(),
            seq,
            signature: *signature.as_bytes(),
            value,
        }
    }

    #[test]
    fn immutable_authenticate_accepts_matching_key() {
        let value = Value::Int(42);
        let key = immutable_key(&value);
        assert!(ImmutableItem::authenticate(&key, value).is_ok());
    }

    #[test]
    fn immutable_authenticate_rejects_mismatched_key() {
        let value = Value::Int(42);
        let wrong_key = NodeId::zero();
        assert!(ImmutableItem::authenticate(&wrong_key, value).is_err());
    }

    #[test]
    fn mutable_item_with_valid_signature_verifies() {
        let keypair = Ed25519KeyPair::from_seed([7u8; 32]);
        let item = sign_item(&keypair, b"", 1, Value::Int(42));
        assert!(item.verify().is_ok());
    }

    #[test]
    fn bit_flip_in_value_invalidates_signature() {
        let keypair = Ed25519KeyPair::from_seed([7u8; 32]);
        let mut item = sign_item(&keypair, b"", 1, Value::Int(42));
        item.value = Value::Int(43);
        assert!(item.verify().is_err());
    }

    #[test]
    fn bit_flip_in_seq_invalidates_signature() {
        let keypair = Ed25519KeyPair::from_seed([7u8; 32]);
        let mut item = sign_item(&keypair, b"", 1, Value::Int(42));
        item.seq = 2;
        assert!(item.verify().is_err());
    }

    #[test]
    fn bit_flip_in_salt_invalidates_signature() {
        let keypair = Ed25519KeyPair::from_seed([7u8; 32]);
        let mut item = sign_item(&keypair, b"abc", 1, Value::Int(42));
        item.salt = b"abd".to_vec();
        assert!(item.verify().is_err());
    }

    #[test]
    fn lower_seq_is_rejected_by_authenticate() {
        let keypair = Ed25519KeyPair::from_seed([7u8; 32]);
        let existing = sign_item(&keypair, b"", 5, Value::Int(1));
        let incoming = sign_item(&keypair, b"", 4, Value::Int(2));
        assert!(matches!(incoming.authenticate(Some(&existing)), Err(DhtError::SeqTooLow)));
    }

    #[test]
    fn higher_seq_replaces_existing() {
        let keypair = Ed25519KeyPair::from_seed([7u8; 32]);
        let existing = sign_item(&keypair, b"", 1, Value::Int(42));
        let incoming = sign_item(&keypair, b"", 2, Value::Int(43));
        assert!(incoming.authenticate(Some(&existing)).is_ok());
    }
}
