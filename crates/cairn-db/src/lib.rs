//! # cairn-db
//!
//! Persistent key-value storage for the Cairn DHT.
//!
//! The DHT consumes storage through the [`Datastore`] trait: a flat
//! string-keyed byte store with prefix queries. Two implementations ship
//! here:
//!
//! - [`SqliteDatastore`] — the production store, a single SQLite database
//!   in WAL mode.
//! - [`MemoryDatastore`] — an ordered in-memory map for tests.
//!
//! Keys are path-like ASCII strings (`/providers/<cid>/<peer>`,
//! `/<namespace>/<key>`); values are opaque byte blobs.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryDatastore;
pub use sqlite::SqliteDatastore;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// SQLite-level failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The requested key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store has been closed.
    #[error("datastore closed")]
    Closed,
}

/// Convenience result type for datastore operations.
pub type Result<T> = std::result::Result<T, DbError>;

/// A flat key-value store with prefix queries.
///
/// Mutations are serialized internally by each implementation; callers may
/// share a store across tasks behind an `Arc`.
pub trait Datastore: Send + Sync {
    /// Store `value` under `key`, replacing any existing value.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Fetch the value stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Whether a value is stored under `key`.
    fn has(&self, key: &str) -> Result<bool>;

    /// Remove the value stored under `key`. Removing an absent key is a no-op.
    fn delete(&self, key: &str) -> Result<()>;

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    fn query(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}
