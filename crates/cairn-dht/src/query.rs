//! The iterative lookup engine.
//!
//! A query walks the network toward a target key: it keeps a frontier of the
//! closest known, not-yet-queried peers, asks up to `alpha` of them at a
//! time, and merges every response's closer peers back into the frontier.
//! It stops when a terminal result arrives, when the frontier is exhausted
//! (classic Kademlia convergence), or when the soft deadline passes.
//!
//! Individual peer failures — dial errors, timeouts, undecodable replies —
//! contribute nothing and never abort the query. Only a query in which every
//! contacted peer failed reports [`DhtError::LookupFailed`].

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use cairn_types::{KadId, PeerId, PeerInfo, Record};

use crate::peer_list::LimitedPeerList;
use crate::{DhtError, Result};

/// Per-query tuning: parallelism, frontier width, and deadline.
#[derive(Clone, Debug)]
pub struct QueryConfig {
    /// Maximum concurrently outstanding peer requests.
    pub alpha: usize,
    /// Frontier and result width: the `k` closest peers tracked.
    pub k: usize,
    /// Soft deadline for the whole query.
    pub deadline: Duration,
}

/// What one peer contributed to a query.
#[derive(Debug, Default)]
pub struct PeerResponse {
    /// Peers the responder believes are closer to the target.
    pub closer_peers: Vec<PeerInfo>,
    /// A record, for value lookups.
    pub record: Option<Record>,
    /// Provider peers, for provider lookups.
    pub providers: Vec<PeerInfo>,
    /// The exact peer a peer-lookup resolved.
    pub found_peer: Option<PeerInfo>,
    /// Terminal: single-result queries stop as soon as this is set.
    pub done: bool,
}

/// Aggregated outcome of one query.
#[derive(Debug, Default)]
pub struct QueryResult {
    /// The first record a peer returned, if any.
    pub record: Option<Record>,
    /// The exact peer a peer-lookup resolved, if any.
    pub found_peer: Option<PeerInfo>,
    /// All distinct providers discovered.
    pub providers: Vec<PeerInfo>,
    /// The `k` closest peers that responded successfully.
    pub closest: Vec<PeerInfo>,
    /// Number of peers contacted.
    pub queried: usize,
    /// Number of contacted peers that failed.
    pub failures: usize,
}

/// One iterative lookup toward `target`.
pub struct Query<F> {
    target: KadId,
    config: QueryConfig,
    query_fn: F,
    max_providers: Option<usize>,
    excluded: HashSet<PeerId>,
}

impl<F> Query<F> {
    /// Build a query over `query_fn`, which performs one peer exchange.
    pub fn new(target: KadId, config: QueryConfig, query_fn: F) -> Self {
        Self {
            target,
            config,
            query_fn,
            max_providers: None,
            excluded: HashSet::new(),
        }
    }

    /// Stop accumulating once this many distinct providers are known.
    pub fn max_providers(mut self, max: usize) -> Self {
        self.max_providers = Some(max);
        self
    }

    /// Never contact this peer (typically the local node).
    pub fn exclude(mut self, id: PeerId) -> Self {
        self.excluded.insert(id);
        self
    }

    /// Run the lookup from the given seed peers.
    pub async fn run<Fut>(self, seeds: Vec<PeerInfo>) -> Result<QueryResult>
    where
        F: Fn(PeerInfo) -> Fut,
        Fut: Future<Output = Result<PeerResponse>> + Send + 'static,
    {
        let mut frontier = LimitedPeerList::new(self.target, self.config.k);
        let mut queried: HashSet<PeerId> = self.excluded.clone();
        let mut responded = LimitedPeerList::new(self.target, self.config.k);
        let mut providers_seen: HashSet<PeerId> = HashSet::new();
        let mut result = QueryResult::default();
        let mut in_flight: JoinSet<(PeerInfo, Result<PeerResponse>)> = JoinSet::new();

        for seed in seeds {
            if !queried.contains(&seed.id) {
                frontier.push(seed);
            }
        }

        let deadline = Instant::now() + self.config.deadline;

        'lookup: loop {
            // Fill free concurrency slots with the closest unqueried peers.
            while in_flight.len() < self.config.alpha {
                let Some(peer) = frontier.pop_closest() else {
                    break;
                };
                if !queried.insert(peer.id) {
                    continue;
                }
                let fut = (self.query_fn)(peer.clone());
                in_flight.spawn(async move { (peer, fut.await) });
            }

            // Frontier exhausted with nothing outstanding: converged.
            if in_flight.is_empty() {
                break;
            }

            // Responses are processed strictly in arrival order; each merge
            // completes before the next response is taken.
            let joined = tokio::select! {
                joined = in_flight.join_next() => joined,
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::debug!("query deadline reached");
                    break 'lookup;
                }
            };
            let Some(joined) = joined else { break };
            let Ok((peer, outcome)) = joined else {
                continue;
            };

            match outcome {
                Err(e) => {
                    // This peer contributes nothing; the lookup goes on.
                    result.failures += 1;
                    tracing::debug!(peer = %peer.id, error = %e, "peer query failed");
                }
                Ok(response) => {
                    responded.push(peer.clone());

                    for closer in response.closer_peers {
                        if !queried.contains(&closer.id) {
                            frontier.push(closer);
                        }
                    }

                    if result.record.is_none() {
                        result.record = response.record;
                    }
                    if result.found_peer.is_none() {
                        result.found_peer = response.found_peer;
                    }

                    for provider in response.providers {
                        if providers_seen.insert(provider.id) {
                            result.providers.push(provider);
                        }
                    }

                    if response.done {
                        tracing::debug!(peer = %peer.id, "query reached terminal result");
                        break;
                    }
                    if let Some(max) = self.max_providers {
                        if result.providers.len() >= max {
                            break;
                        }
                    }
                }
            }
        }

        // Late results from still-outstanding requests are discarded.
        result.closest = responded.to_vec();
        result.queried = queried.len() - self.excluded.len();

        tracing::debug!(
            queried = result.queried,
            failures = result.failures,
            providers = result.providers.len(),
            found_record = result.record.is_some(),
            "query finished"
        );

        if result.queried > 0
            && result.failures == result.queried
            && result.record.is_none()
            && result.providers.is_empty()
        {
            return Err(DhtError::LookupFailed);
        }

        Ok(result)
    }
}
