//! Joining the network and keeping the routing table fresh.
//!
//! Bootstrap contacts the configured seed peers (with retries), adds the
//! responsive ones to the routing table, and then looks up the local node's
//! own id to discover its keyspace neighborhood.
//!
//! The random walk re-runs lookups toward random keyspace points on an
//! interval, which keeps distant buckets populated as peers churn.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cairn_transport::switch::Switch;
use cairn_types::{PeerId, PeerInfo};

use crate::dht::run_find_node;
use crate::handlers::lock;
use crate::network::Network;
use crate::query::QueryConfig;
use crate::routing::RoutingTable;
use crate::{DhtError, Result};

/// Configuration for the bootstrap process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Maximum ping attempts per seed peer.
    pub max_retries: u32,
    /// Minimum number of seeds that must respond for bootstrap to succeed.
    pub min_responsive_seeds: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_responsive_seeds: 1,
        }
    }
}

impl BootstrapConfig {
    /// Validate against a concrete seed list.
    pub fn validate(&self, seeds: &[PeerInfo]) -> Result<()> {
        if seeds.is_empty() {
            return Err(DhtError::Bootstrap("no seed peers configured".to_string()));
        }
        if self.min_responsive_seeds > seeds.len() {
            return Err(DhtError::Bootstrap(format!(
                "min_responsive_seeds ({}) exceeds seed count ({})",
                self.min_responsive_seeds,
                seeds.len()
            )));
        }
        Ok(())
    }
}

/// The outcome of a bootstrap attempt.
#[derive(Clone, Debug)]
pub struct BootstrapResult {
    /// Number of seed peers that responded to a ping.
    pub responsive_seeds: usize,
    /// Number of peers discovered by the self-lookup.
    pub peers_discovered: usize,
}

/// Ping each seed (with retries) and add responders to the routing table.
pub(crate) async fn contact_seeds<S: Switch>(
    network: &Arc<Network<S>>,
    routing: &Arc<Mutex<RoutingTable>>,
    seeds: &[PeerInfo],
    config: &BootstrapConfig,
    ping_timeout: Duration,
) -> Result<usize> {
    config.validate(seeds)?;

    info!(seed_count = seeds.len(), "starting DHT bootstrap");

    let mut responsive = 0usize;
    for seed in seeds {
        let mut connected = false;
        for attempt in 1..=config.max_retries {
            debug!(peer = %seed.id, attempt, "pinging seed peer");
            if network.ping(seed, ping_timeout).await {
                lock(routing).add(seed.clone());
                responsive += 1;
                connected = true;
                info!(peer = %seed.id, "seed peer responded");
                break;
            }
            warn!(peer = %seed.id, attempt, "seed peer ping failed");
        }
        if !connected {
            warn!(peer = %seed.id, "seed peer unreachable after all retries");
        }
    }

    if responsive < config.min_responsive_seeds {
        return Err(DhtError::Bootstrap(format!(
            "only {} of {} required seed peers responded",
            responsive, config.min_responsive_seeds
        )));
    }

    Ok(responsive)
}

/// Periodically look up random keyspace points to refresh the table.
pub(crate) async fn random_walk_loop<S: Switch>(
    network: Arc<Network<S>>,
    routing: Arc<Mutex<RoutingTable>>,
    local: PeerId,
    ping_timeout: Duration,
    query_config: QueryConfig,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;

        let wire_key = PeerId::random().as_bytes().to_vec();
        let target = cairn_types::KadId::hash(&wire_key);
        let seeds = lock(&routing).closest_peers(&target, query_config.k);
        if seeds.is_empty() {
            continue;
        }

        match run_find_node(
            Arc::clone(&network),
            Arc::clone(&routing),
            local,
            ping_timeout,
            query_config.clone(),
            wire_key,
            seeds,
        )
        .await
        {
            Ok(result) => debug!(
                queried = result.queried,
                "random walk refreshed routing table"
            ),
            Err(e) => debug!(error = %e, "random walk lookup failed"),
        }
    }
}
