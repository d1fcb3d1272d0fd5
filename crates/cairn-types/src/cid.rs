//! Opaque content identifiers.
//!
//! A [`Cid`] is a self-describing content address produced by the
//! content-addressing layer. The DHT treats it as a validated byte key:
//! the only structure it relies on is that the bytes are non-empty, bounded
//! in size, and stable under round-tripping.

use serde::{Deserialize, Serialize};

use crate::key::KadId;
use crate::TypesError;

/// Maximum accepted length of a content identifier in bytes.
pub const MAX_CID_LEN: usize = 128;

/// An opaque, validated content key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cid(Vec<u8>);

impl Cid {
    /// Parse a content identifier from raw bytes.
    ///
    /// Rejects empty and oversized keys; everything else is opaque.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.is_empty() {
            return Err(TypesError::InvalidCid("empty key".to_string()));
        }
        if bytes.len() > MAX_CID_LEN {
            return Err(TypesError::InvalidCid(format!(
                "key too long: {} bytes, max {MAX_CID_LEN}",
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// The raw content-key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// This key's position in the XOR keyspace.
    pub fn kad_id(&self) -> KadId {
        KadId::hash(&self.0)
    }
}

impl std::fmt::Debug for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = &self.0[..self.0.len().min(8)];
        write!(f, "Cid({})", hex::encode(prefix))
    }
}

impl std::fmt::Display for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_accepts_valid() {
        let cid = Cid::from_bytes(b"\x12\x20abcdef").expect("valid cid");
        assert_eq!(cid.as_bytes(), b"\x12\x20abcdef");
    }

    #[test]
    fn test_from_bytes_rejects_empty() {
        assert!(Cid::from_bytes(b"").is_err());
    }

    #[test]
    fn test_from_bytes_rejects_oversized() {
        let big = vec![0u8; MAX_CID_LEN + 1];
        assert!(Cid::from_bytes(&big).is_err());
    }

    #[test]
    fn test_kad_id_matches_hash_of_bytes() {
        let cid = Cid::from_bytes(b"content").expect("valid cid");
        assert_eq!(cid.kad_id(), KadId::hash(b"content"));
    }
}
