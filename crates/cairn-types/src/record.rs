//! Stored key/value records.
//!
//! A [`Record`] is the unit of value storage in the DHT: a key, a value, and
//! the time the storing node received it (Unix epoch milliseconds). Record
//! keys are namespaced paths (`/<namespace>/<rest>`); the namespace selects
//! which validator and selector apply.

use serde::{Deserialize, Serialize};

/// A DHT value record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The record key. Namespaced: the first path segment selects the validator.
    pub key: Vec<u8>,
    /// The record value bytes.
    pub value: Vec<u8>,
    /// Unix epoch milliseconds at which the storing node received this record.
    ///
    /// Absent on records that have not yet been accepted by any node.
    pub time_received: Option<u64>,
}

impl Record {
    /// Create a record that has not yet been received by any node.
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            time_received: None,
        }
    }

    /// Stamp the receipt time (Unix epoch milliseconds).
    pub fn stamp_received(&mut self, now_millis: u64) {
        self.time_received = Some(now_millis);
    }

    /// The namespace of this record's key: the first `/`-separated path segment.
    ///
    /// Returns `None` when the key is not a namespaced path.
    pub fn namespace(&self) -> Option<&str> {
        namespace_of(&self.key)
    }
}

/// Extract the namespace (first path segment) from a record key.
///
/// `/v/some-name` → `Some("v")`. Keys that are not UTF-8 paths starting with
/// `/` have no namespace.
pub fn namespace_of(key: &[u8]) -> Option<&str> {
    let s = std::str::from_utf8(key).ok()?;
    let rest = s.strip_prefix('/')?;
    let ns = rest.split('/').next()?;
    if ns.is_empty() {
        return None;
    }
    Some(ns)
}
