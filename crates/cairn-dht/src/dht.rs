//! The DHT facade.
//!
//! Wires the routing table, provider store, validators, RPC client and
//! server, and the query engine into the public operations: `put_value`,
//! `get_value`, `provide`, `find_providers`, `find_peer`, `closest_peers`,
//! plus lifecycle (`start`/`stop`), `bootstrap`, and the peer-connection
//! notifications the transport layer calls directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use cairn_db::Datastore;
use cairn_transport::cbor;
use cairn_transport::message::{Message, MessageType};
use cairn_transport::switch::Switch;
use cairn_types::{Cid, KadId, PeerId, PeerInfo, Record};

use crate::bootstrap::{contact_seeds, random_walk_loop, BootstrapConfig, BootstrapResult};
use crate::config::DhtConfig;
use crate::handlers::{lock, RpcHandler};
use crate::network::Network;
use crate::providers::ProviderStore;
use crate::query::{PeerResponse, Query, QueryConfig, QueryResult};
use crate::routing::{AddOutcome, RoutingTable};
use crate::validators::ValidatorRegistry;
use crate::{now_millis, record_key, DhtError, Result};

/// One DHT node.
pub struct Dht<S: Switch> {
    local: PeerInfo,
    config: DhtConfig,
    switch: Arc<S>,
    network: Arc<Network<S>>,
    routing: Arc<Mutex<RoutingTable>>,
    providers: Arc<ProviderStore>,
    datastore: Arc<dyn Datastore>,
    validators: Arc<ValidatorRegistry>,
    handler: Arc<RpcHandler<S>>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: Switch> Dht<S> {
    /// Build a DHT over a switch and datastore with default validators.
    pub fn new(switch: Arc<S>, datastore: Arc<dyn Datastore>, config: DhtConfig) -> Self {
        Self::with_validators(switch, datastore, config, ValidatorRegistry::with_defaults())
    }

    /// Build a DHT with an explicit validator/selector registry.
    pub fn with_validators(
        switch: Arc<S>,
        datastore: Arc<dyn Datastore>,
        config: DhtConfig,
        validators: ValidatorRegistry,
    ) -> Self {
        let local = switch.local_peer();
        let routing = Arc::new(Mutex::new(RoutingTable::new(
            local.id,
            config.k,
            config.max_buckets,
        )));
        let providers = Arc::new(ProviderStore::new(
            Arc::clone(&datastore),
            Duration::from_millis(config.provide_validity_ms),
            Duration::from_millis(config.cleanup_interval_ms),
            config.providers_cache_size,
        ));
        let network = Arc::new(Network::new(
            Arc::clone(&switch),
            Duration::from_millis(config.read_timeout_ms),
        ));
        let validators = Arc::new(validators);
        let handler = Arc::new(RpcHandler::new(
            local.clone(),
            config.k,
            Duration::from_millis(config.read_timeout_ms),
            Duration::from_millis(config.ping_timeout_ms),
            Arc::clone(&routing),
            Arc::clone(&providers),
            Arc::clone(&datastore),
            Arc::clone(&validators),
            Arc::clone(&network),
        ));

        Self {
            local,
            config,
            switch,
            network,
            routing,
            providers,
            datastore,
            validators,
            handler,
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// This node's identity and addresses.
    pub fn local_peer(&self) -> &PeerInfo {
        &self.local
    }

    /// Number of peers currently in the routing table.
    pub fn routing_table_size(&self) -> usize {
        lock(&self.routing).len()
    }

    /// Start serving inbound RPCs and background maintenance.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut tasks = lock(&self.tasks);

        let switch = Arc::clone(&self.switch);
        let handler = Arc::clone(&self.handler);
        tasks.push(tokio::spawn(async move {
            loop {
                let Some(inbound) = switch.accept().await else {
                    break;
                };
                let handler = Arc::clone(&handler);
                tokio::spawn(async move { handler.serve_stream(inbound).await });
            }
        }));

        if self.config.random_walk {
            tasks.push(tokio::spawn(random_walk_loop(
                Arc::clone(&self.network),
                Arc::clone(&self.routing),
                self.local.id,
                self.ping_timeout(),
                self.query_config(),
                Duration::from_millis(self.config.random_walk_interval_ms),
            )));
        }

        self.providers.start_sweeper();

        tracing::info!(peer = %self.local.id, "DHT started");
    }

    /// Stop background work. In-flight queries are abandoned. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.providers.stop();
        tracing::info!(peer = %self.local.id, "DHT stopped");
    }

    fn ensure_started(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DhtError::NotStarted)
        }
    }

    fn query_config(&self) -> QueryConfig {
        QueryConfig {
            alpha: self.config.alpha,
            k: self.config.k,
            deadline: Duration::from_millis(self.config.query_timeout_ms),
        }
    }

    fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.config.ping_timeout_ms)
    }

    fn seeds_for(&self, target: &KadId) -> Vec<PeerInfo> {
        lock(&self.routing).closest_peers(target, self.config.k)
    }

    // -----------------------------------------------------------------------
    // Peer lifecycle (called directly by the transport layer)
    // -----------------------------------------------------------------------

    /// A connection to `info` was established.
    ///
    /// Adds the peer to the routing table; when its bucket is full, the
    /// least-recently-seen entry is pinged and this call waits for the
    /// verdict (dead entries are evicted, live ones win over the newcomer).
    pub async fn on_peer_connected(&self, info: PeerInfo) {
        let outcome = lock(&self.routing).add(info.clone());
        if let AddOutcome::Full {
            least_recently_seen,
        } = outcome
        {
            if self
                .network
                .ping(&least_recently_seen, self.ping_timeout())
                .await
            {
                lock(&self.routing).touch(&least_recently_seen.id);
                tracing::debug!(
                    kept = %least_recently_seen.id,
                    dropped = %info.id,
                    "bucket full, resident peer still alive"
                );
            } else {
                lock(&self.routing).evict_and_insert(&least_recently_seen.id, info);
                tracing::debug!(evicted = %least_recently_seen.id, "evicted unresponsive peer");
            }
        }
    }

    /// The connection to `id` closed.
    pub fn on_peer_disconnected(&self, id: &PeerId) {
        if lock(&self.routing).remove(id).is_some() {
            tracing::debug!(peer = %id, "removed disconnected peer");
        }
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    /// Store `value` under `key` locally and on the `k` closest peers.
    pub async fn put_value(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.ensure_started()?;

        let mut record = Record::new(key.to_vec(), value);
        self.validators.validate(key, &record)?;
        record.stamp_received(now_millis());
        self.datastore
            .put(&record_key(key), &cbor::to_vec(&record)?)?;

        let closest = self.closest_peers(key).await?;
        let msg = Message::new(MessageType::PutValue, key.to_vec()).with_record(record);
        let mut replicated = 0usize;
        for peer in &closest {
            match self.network.send_message(peer, &msg).await {
                Ok(()) => replicated += 1,
                Err(e) => tracing::debug!(peer = %peer.id, error = %e, "replication send failed"),
            }
        }

        tracing::debug!(
            key = %String::from_utf8_lossy(key),
            replicated,
            "value stored"
        );
        Ok(())
    }

    /// Fetch the best value for `key`, consulting the local store first.
    ///
    /// Returns `Ok(None)` when the lookup converges without finding a value.
    pub async fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_started()?;

        let mut candidates: Vec<Record> = Vec::new();
        if let Some(record) = self.get_local(key)? {
            candidates.push(record);
        }

        if candidates.is_empty() {
            let target = KadId::hash(key);
            let seeds = self.seeds_for(&target);

            let network = Arc::clone(&self.network);
            let routing = Arc::clone(&self.routing);
            let validators = Arc::clone(&self.validators);
            let ping_timeout = self.ping_timeout();
            let wire_key = key.to_vec();

            let query = Query::new(target, self.query_config(), move |peer: PeerInfo| {
                let network = Arc::clone(&network);
                let routing = Arc::clone(&routing);
                let validators = Arc::clone(&validators);
                let key = wire_key.clone();
                async move {
                    let msg = Message::new(MessageType::GetValue, key.clone());
                    let reply = network.send_request(&peer, &msg).await?;
                    note_peer(&routing, &network, ping_timeout, &peer);

                    let mut response = PeerResponse {
                        closer_peers: reply.closer_peers,
                        ..Default::default()
                    };
                    if let Some(record) = reply.record {
                        match validators.validate(&key, &record) {
                            Ok(()) => {
                                response.record = Some(record);
                                response.done = true;
                            }
                            Err(e) => {
                                tracing::debug!(peer = %peer.id, error = %e, "peer returned invalid record");
                            }
                        }
                    }
                    Ok(response)
                }
            })
            .exclude(self.local.id);

            let result = query.run(seeds).await?;
            candidates.extend(result.record);
        }

        if candidates.is_empty() {
            return Ok(None);
        }
        let best = self.validators.select(key, &candidates)?;
        Ok(Some(candidates.swap_remove(best).value))
    }

    /// The locally stored record for `key`, if present and still valid.
    pub fn get_local(&self, key: &[u8]) -> Result<Option<Record>> {
        let Some(bytes) = self.datastore.get(&record_key(key))? else {
            return Ok(None);
        };
        let record: Record = match cbor::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "local record failed to decode");
                return Ok(None);
            }
        };
        match self.validators.validate(key, &record) {
            Ok(()) => Ok(Some(record)),
            Err(e) => {
                tracing::debug!(error = %e, "local record failed validation");
                Ok(None)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Providers
    // -----------------------------------------------------------------------

    /// Advertise this node as a provider for `cid`.
    pub async fn provide(&self, cid: &Cid) -> Result<()> {
        self.ensure_started()?;

        self.providers.add_provider(cid, self.local.id)?;

        let closest = self.closest_peers(cid.as_bytes()).await?;
        let msg = Message::new(MessageType::AddProvider, cid.as_bytes().to_vec())
            .with_provider_peers(vec![self.local.clone()]);
        let mut advertised = 0usize;
        for peer in &closest {
            match self.network.send_message(peer, &msg).await {
                Ok(()) => advertised += 1,
                Err(e) => {
                    tracing::debug!(peer = %peer.id, error = %e, "provider advertisement failed")
                }
            }
        }

        tracing::debug!(%cid, advertised, "providing content");
        Ok(())
    }

    /// Find up to `max` peers providing `cid`.
    ///
    /// Local provider records count first; the network is queried for the
    /// rest. An empty result is not an error.
    pub async fn find_providers(&self, cid: &Cid, max: usize) -> Result<Vec<PeerInfo>> {
        self.ensure_started()?;

        let mut found: Vec<PeerInfo> = self
            .providers
            .get_providers(cid)?
            .into_iter()
            .map(|id| self.resolve_addrs(id))
            .collect();
        if found.len() >= max {
            found.truncate(max);
            return Ok(found);
        }

        let target = cid.kad_id();
        let seeds = self.seeds_for(&target);

        let network = Arc::clone(&self.network);
        let routing = Arc::clone(&self.routing);
        let ping_timeout = self.ping_timeout();
        let wire_key = cid.as_bytes().to_vec();

        let query = Query::new(target, self.query_config(), move |peer: PeerInfo| {
            let network = Arc::clone(&network);
            let routing = Arc::clone(&routing);
            let key = wire_key.clone();
            async move {
                let msg = Message::new(MessageType::GetProviders, key);
                let reply = network.send_request(&peer, &msg).await?;
                note_peer(&routing, &network, ping_timeout, &peer);
                Ok(PeerResponse {
                    closer_peers: reply.closer_peers,
                    providers: reply.provider_peers,
                    ..Default::default()
                })
            }
        })
        .exclude(self.local.id)
        .max_providers(max);

        let result = query.run(seeds).await?;
        for provider in result.providers {
            if found.len() >= max {
                break;
            }
            if !found.iter().any(|p| p.id == provider.id) {
                found.push(provider);
            }
        }
        Ok(found)
    }

    // -----------------------------------------------------------------------
    // Peers
    // -----------------------------------------------------------------------

    /// Locate a peer by id.
    ///
    /// Checks the routing table, then walks the network toward the peer's
    /// keyspace position.
    pub async fn find_peer(&self, id: &PeerId) -> Result<PeerInfo> {
        self.ensure_started()?;

        if *id == self.local.id {
            return Ok(self.local.clone());
        }
        if let Some(info) = lock(&self.routing).find(id).cloned() {
            return Ok(info);
        }

        let wire_key = id.as_bytes().to_vec();
        let target = KadId::hash(&wire_key);
        let seeds = self.seeds_for(&target);

        let network = Arc::clone(&self.network);
        let routing = Arc::clone(&self.routing);
        let ping_timeout = self.ping_timeout();
        let wanted = *id;

        let query = Query::new(target, self.query_config(), move |peer: PeerInfo| {
            let network = Arc::clone(&network);
            let routing = Arc::clone(&routing);
            let key = wire_key.clone();
            async move {
                let msg = Message::new(MessageType::FindNode, key);
                let reply = network.send_request(&peer, &msg).await?;
                note_peer(&routing, &network, ping_timeout, &peer);

                let found = reply.closer_peers.iter().find(|p| p.id == wanted).cloned();
                Ok(PeerResponse {
                    done: found.is_some(),
                    found_peer: found,
                    closer_peers: reply.closer_peers,
                    ..Default::default()
                })
            }
        })
        .exclude(self.local.id);

        let result = query.run(seeds).await?;
        result.found_peer.ok_or(DhtError::NotFound)
    }

    /// The `k` closest responding peers to `key`, found iteratively.
    pub async fn closest_peers(&self, key: &[u8]) -> Result<Vec<PeerInfo>> {
        self.ensure_started()?;
        let target = KadId::hash(key);
        let seeds = self.seeds_for(&target);
        let result = run_find_node(
            Arc::clone(&self.network),
            Arc::clone(&self.routing),
            self.local.id,
            self.ping_timeout(),
            self.query_config(),
            key.to_vec(),
            seeds,
        )
        .await?;
        Ok(result.closest)
    }

    // -----------------------------------------------------------------------
    // Bootstrap
    // -----------------------------------------------------------------------

    /// Join the network: contact seeds, then look up our own neighborhood.
    pub async fn bootstrap(
        &self,
        seeds: &[PeerInfo],
        config: &BootstrapConfig,
    ) -> Result<BootstrapResult> {
        self.ensure_started()?;

        let responsive_seeds = contact_seeds(
            &self.network,
            &self.routing,
            seeds,
            config,
            self.ping_timeout(),
        )
        .await?;

        let self_key = self.local.id.as_bytes().to_vec();
        let target = KadId::hash(&self_key);
        let neighborhood = self.seeds_for(&target);
        let peers_discovered = match run_find_node(
            Arc::clone(&self.network),
            Arc::clone(&self.routing),
            self.local.id,
            self.ping_timeout(),
            self.query_config(),
            self_key,
            neighborhood,
        )
        .await
        {
            Ok(result) => result.queried,
            Err(e) => {
                tracing::warn!(error = %e, "self-lookup during bootstrap failed");
                0
            }
        };

        tracing::info!(responsive_seeds, peers_discovered, "bootstrap complete");
        Ok(BootstrapResult {
            responsive_seeds,
            peers_discovered,
        })
    }

    fn resolve_addrs(&self, id: PeerId) -> PeerInfo {
        if id == self.local.id {
            return self.local.clone();
        }
        lock(&self.routing)
            .find(&id)
            .cloned()
            .unwrap_or_else(|| PeerInfo::new(id))
    }
}

impl<S: Switch> Drop for Dht<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Record contact with a peer, checking the displaced entry in the background.
///
/// The client-side twin of the handler's refresh path: a successful RPC
/// round-trip proves liveness, so the peer moves to most-recently-seen. When
/// its bucket is full the least-recently-seen resident is pinged off the hot
/// path and evicted only if it fails.
pub(crate) fn note_peer<S: Switch>(
    routing: &Arc<Mutex<RoutingTable>>,
    network: &Arc<Network<S>>,
    ping_timeout: Duration,
    info: &PeerInfo,
) {
    let outcome = lock(routing).add(info.clone());
    if let AddOutcome::Full {
        least_recently_seen,
    } = outcome
    {
        let routing = Arc::clone(routing);
        let network = Arc::clone(network);
        let newcomer = info.clone();
        tokio::spawn(async move {
            if network.ping(&least_recently_seen, ping_timeout).await {
                lock(&routing).touch(&least_recently_seen.id);
            } else {
                lock(&routing).evict_and_insert(&least_recently_seen.id, newcomer);
            }
        });
    }
}

/// Run one iterative FIND_NODE lookup for `wire_key`.
///
/// Shared by `closest_peers`, bootstrap's self-lookup, and the random walk.
pub(crate) async fn run_find_node<S: Switch>(
    network: Arc<Network<S>>,
    routing: Arc<Mutex<RoutingTable>>,
    local: PeerId,
    ping_timeout: Duration,
    config: QueryConfig,
    wire_key: Vec<u8>,
    seeds: Vec<PeerInfo>,
) -> Result<QueryResult> {
    let target = KadId::hash(&wire_key);
    let query_network = Arc::clone(&network);
    let query = Query::new(target, config, move |peer: PeerInfo| {
        let network = Arc::clone(&query_network);
        let routing = Arc::clone(&routing);
        let key = wire_key.clone();
        async move {
            let msg = Message::new(MessageType::FindNode, key);
            let reply = network.send_request(&peer, &msg).await?;
            note_peer(&routing, &network, ping_timeout, &peer);
            Ok(PeerResponse {
                closer_peers: reply.closer_peers,
                ..Default::default()
            })
        }
    })
    .exclude(local);
    query.run(seeds).await
}
