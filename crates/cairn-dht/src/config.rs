//! DHT configuration.
//!
//! Every protocol parameter is carried here rather than hard-coded, so tests
//! can shrink timeouts and deployments can tune table shape. Defaults match
//! the constants in the crate root.

use serde::{Deserialize, Serialize};

/// Complete configuration for one DHT instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DhtConfig {
    /// Bucket size and replication factor.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Lookup parallelism: maximum concurrent requests per query.
    #[serde(default = "default_alpha")]
    pub alpha: usize,
    /// Maximum number of buckets the routing table may split into.
    #[serde(default = "default_max_buckets")]
    pub max_buckets: usize,
    /// Per-request read timeout in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Per-query soft deadline in milliseconds.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Liveness ping timeout for bucket eviction, in milliseconds.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Provider record validity in milliseconds.
    #[serde(default = "default_provide_validity_ms")]
    pub provide_validity_ms: u64,
    /// Provider cleanup sweep interval in milliseconds.
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    /// Providers LRU cache capacity (distinct content keys).
    #[serde(default = "default_providers_cache_size")]
    pub providers_cache_size: usize,
    /// Whether the periodic random-walk maintenance runs.
    #[serde(default = "default_true")]
    pub random_walk: bool,
    /// Random-walk interval in milliseconds.
    #[serde(default = "default_random_walk_interval_ms")]
    pub random_walk_interval_ms: u64,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            alpha: default_alpha(),
            max_buckets: default_max_buckets(),
            read_timeout_ms: default_read_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            provide_validity_ms: default_provide_validity_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            providers_cache_size: default_providers_cache_size(),
            random_walk: true,
            random_walk_interval_ms: default_random_walk_interval_ms(),
        }
    }
}

fn default_k() -> usize {
    crate::K
}
fn default_alpha() -> usize {
    crate::ALPHA
}
fn default_max_buckets() -> usize {
    crate::MAX_BUCKETS
}
fn default_read_timeout_ms() -> u64 {
    crate::READ_TIMEOUT_MS
}
fn default_query_timeout_ms() -> u64 {
    crate::QUERY_TIMEOUT_MS
}
fn default_ping_timeout_ms() -> u64 {
    crate::PING_TIMEOUT_MS
}
fn default_provide_validity_ms() -> u64 {
    crate::PROVIDE_VALIDITY_MS
}
fn default_cleanup_interval_ms() -> u64 {
    crate::CLEANUP_INTERVAL_MS
}
fn default_providers_cache_size() -> usize {
    crate::PROVIDERS_CACHE_SIZE
}
fn default_random_walk_interval_ms() -> u64 {
    crate::RANDOM_WALK_INTERVAL_MS
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let cfg = DhtConfig::default();
        assert_eq!(cfg.k, crate::K);
        assert_eq!(cfg.alpha, crate::ALPHA);
        assert_eq!(cfg.read_timeout_ms, crate::READ_TIMEOUT_MS);
        assert!(cfg.random_walk);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let cfg: DhtConfig = serde_json::from_str(r#"{"k": 8}"#).expect("parse");
        assert_eq!(cfg.k, 8);
        assert_eq!(cfg.alpha, crate::ALPHA);
    }
}
