//! The 256-bit XOR keyspace.
//!
//! Every routable object — peer, content key, record key — is projected onto
//! a 256-bit keyspace by hashing its raw bytes with SHA-256. Distance between
//! two points is their bitwise XOR, compared as a big-endian unsigned integer.
//! Lexicographic comparison of the XOR bytes is exactly that ordering.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A point in the 256-bit Kademlia keyspace.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KadId([u8; 32]);

impl KadId {
    /// Project raw bytes onto the keyspace via SHA-256.
    pub fn hash(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut id = [0u8; 32];
        id.copy_from_slice(&digest);
        Self(id)
    }

    /// Construct from an already-hashed 32-byte value.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw 32 bytes of this keyspace point.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// XOR distance between this point and another.
    pub fn distance(&self, other: &KadId) -> Distance {
        let mut d = [0u8; 32];
        for i in 0..32 {
            d[i] = self.0[i] ^ other.0[i];
        }
        Distance(d)
    }

    /// Length of the common bit prefix between this point and another.
    ///
    /// Returns 256 when the two points are identical.
    pub fn common_prefix_len(&self, other: &KadId) -> usize {
        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            let x = a ^ b;
            if x != 0 {
                return i * 8 + x.leading_zeros() as usize;
            }
        }
        256
    }
}

impl std::fmt::Debug for KadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KadId({})", hex::encode(&self.0[..8]))
    }
}

/// XOR distance between two keyspace points.
///
/// `Ord` compares big-endian: `Distance` values sort the same way the
/// underlying 256-bit unsigned integers would.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance(pub [u8; 32]);

impl Distance {
    /// The zero distance (a point to itself).
    pub const ZERO: Distance = Distance([0u8; 32]);

    /// Number of leading zero bits; larger means closer.
    pub fn leading_zeros(&self) -> usize {
        for (i, byte) in self.0.iter().enumerate() {
            if *byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        256
    }
}

impl std::fmt::Debug for Distance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Distance({})", hex::encode(&self.0[..8]))
    }
}
