//! # cairn-types
//!
//! Core value types for the Cairn DHT:
//!
//! - [`PeerId`] / [`PeerInfo`] / [`Multiaddr`] — peer identity and addressing
//! - [`KadId`] / [`Distance`] — the 256-bit XOR keyspace (SHA-256 derived)
//! - [`Cid`] — opaque validated content keys
//! - [`Record`] — stored key/value records with receipt timestamps
//!
//! These are consumed as opaque value objects with equality and serde
//! serialization by every other crate in the workspace.

pub mod cid;
pub mod key;
pub mod peer;
pub mod record;

pub use cid::Cid;
pub use key::{Distance, KadId};
pub use peer::{Multiaddr, PeerId, PeerInfo};
pub use record::Record;

/// Error types for value-object construction and parsing.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// The bytes do not form a valid peer ID.
    #[error("invalid peer id: expected {expected} bytes, got {got}")]
    InvalidPeerId { expected: usize, got: usize },

    /// The bytes do not parse as a valid content key.
    #[error("invalid cid: {0}")]
    InvalidCid(String),

    /// The string does not parse as a multiaddress.
    #[error("invalid multiaddr: {0}")]
    InvalidMultiaddr(String),
}

/// Convenience result type for value-object construction.
pub type Result<T> = std::result::Result<T, TypesError>;
