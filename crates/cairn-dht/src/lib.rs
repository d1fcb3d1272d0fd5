//! # cairn-dht
//!
//! Kademlia-based distributed hash table for the Cairn P2P network.
//!
//! This crate implements:
//! - Kademlia routing table with XOR-distance metric and own-range bucket
//!   splitting (K=20, alpha=3)
//! - Distance-ordered peer collections backing the lookup frontier
//! - Provider-record store (datastore-backed, LRU-cached, time-expired)
//! - Per-namespace record validators and selectors
//! - The DHT RPC client and server over the Switch seam
//! - The iterative lookup engine with bounded concurrency
//! - The DHT facade: get/put, provide/find-providers, find-peer, bootstrap,
//!   random-walk maintenance
//!
//! ## Key Parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | K (bucket size / replication) | 20 |
//! | alpha (lookup parallelism) | 3 |
//! | Max routing-table depth | 32 buckets |
//! | Provider record validity | 24 hours |
//! | Provider cleanup interval | 10 minutes |
//! | RPC read timeout | 10 seconds |
//! | Query deadline | 60 seconds |
//! | Node ID projection | `SHA-256(peer id bytes)` |

pub mod bootstrap;
pub mod config;
pub mod dht;
pub mod handlers;
pub mod network;
pub mod peer_list;
pub mod providers;
pub mod query;
pub mod routing;
pub mod validators;

pub use config::DhtConfig;
pub use dht::Dht;

/// Kademlia bucket size: maximum contacts per bucket, and the replication
/// factor for lookups and stores.
pub const K: usize = 20;

/// Lookup parallelism factor.
pub const ALPHA: usize = 3;

/// Maximum number of buckets the routing table may split into.
pub const MAX_BUCKETS: usize = 32;

/// Provider record validity in milliseconds (24 hours).
pub const PROVIDE_VALIDITY_MS: u64 = 24 * 60 * 60 * 1000;

/// Provider cleanup sweep interval in milliseconds (10 minutes).
pub const CLEANUP_INTERVAL_MS: u64 = 10 * 60 * 1000;

/// Providers LRU cache capacity (distinct content keys).
pub const PROVIDERS_CACHE_SIZE: usize = 256;

/// Per-request read timeout in milliseconds.
pub const READ_TIMEOUT_MS: u64 = 10_000;

/// Per-query soft deadline in milliseconds.
pub const QUERY_TIMEOUT_MS: u64 = 60_000;

/// Liveness ping timeout for bucket eviction checks, in milliseconds.
pub const PING_TIMEOUT_MS: u64 = 5_000;

/// Random-walk maintenance interval in milliseconds (5 minutes).
pub const RANDOM_WALK_INTERVAL_MS: u64 = 5 * 60 * 1000;

/// Error types for DHT operations.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// An inbound RPC carried no key where one is required.
    #[error("missing key")]
    MissingKey,

    /// An inbound RPC key did not parse as a content identifier.
    #[error("invalid cid: {0}")]
    InvalidCid(String),

    /// A PUT_VALUE arrived without a record attached.
    #[error("empty record")]
    EmptyRecord,

    /// An inbound message carried an unknown or reserved type code.
    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    /// The peer could not be dialed.
    #[error("dial to {peer} failed: {reason}")]
    Dial { peer: String, reason: String },

    /// No response arrived within the read timeout.
    #[error("request timed out")]
    Timeout,

    /// A response failed to decode.
    #[error("decode error: {0}")]
    Decode(String),

    /// A record failed its namespace validator.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// No validator is registered for the record's namespace.
    #[error("no validator for namespace: {0}")]
    UnknownNamespace(String),

    /// Every candidate peer failed during a lookup.
    #[error("lookup failed: no peers responded")]
    LookupFailed,

    /// Bootstrap could not reach enough seed peers.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// The requested value or peer was not found.
    #[error("not found")]
    NotFound,

    /// The operation requires a started DHT.
    #[error("dht not started")]
    NotStarted,

    /// Datastore failure.
    #[error("datastore error: {0}")]
    Db(#[from] cairn_db::DbError),

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] cairn_transport::TransportError),
}

/// Convenience result type for DHT operations.
pub type Result<T> = std::result::Result<T, DhtError>;

/// Current Unix time in milliseconds.
pub(crate) fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Datastore key for a value record: `/<namespace>/<hex rest>`.
///
/// Keys without a namespace fall back to `/records/<hex key>` so arbitrary
/// byte keys still land in a distinct range.
pub(crate) fn record_key(key: &[u8]) -> String {
    match cairn_types::record::namespace_of(key) {
        Some(ns) => {
            let rest = key.get(ns.len() + 2..).unwrap_or(&[]);
            format!("/{}/{}", ns, hex::encode(rest))
        }
        None => format!("/records/{}", hex::encode(key)),
    }
}

/// Datastore key under which the content layer stores a block for a cid.
///
/// The DHT only probes this range (`has`) to decide whether to list itself
/// among a cid's providers.
pub(crate) fn block_key(cid: &cairn_types::Cid) -> String {
    format!("/blocks/{}", hex::encode(cid.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(K, 20);
        assert_eq!(ALPHA, 3);
        assert_eq!(MAX_BUCKETS, 32);
        assert_eq!(PROVIDE_VALIDITY_MS, 86_400_000);
    }

    #[test]
    fn test_timeout_error_mentions_timed_out() {
        // Query-layer code and tests match on this phrasing.
        assert!(DhtError::Timeout.to_string().contains("timed out"));
    }

    #[test]
    fn test_now_millis_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
    }
}
