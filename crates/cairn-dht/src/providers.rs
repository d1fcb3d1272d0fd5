//! Provider-record store.
//!
//! Maps a content key to the set of peers advertising it. Records persist in
//! the datastore under `/providers/<hex cid>/<hex peer>` with an 8-byte
//! big-endian millisecond timestamp as the value (fixed width keeps rows
//! sortable). A bounded LRU cache keyed by content key fronts the datastore;
//! the cache bounds memory only — any record evicted from the cache is still
//! served from the datastore.
//!
//! Records expire `provide_validity` after their timestamp. Expired records
//! are never returned and a periodic sweep deletes them.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use tokio::task::JoinHandle;

use cairn_db::Datastore;
use cairn_types::{Cid, PeerId};

use crate::{now_millis, Result};

/// One provider advertisement: a peer and when it was last refreshed.
#[derive(Clone, Debug)]
struct ProviderEntry {
    peer: PeerId,
    time_millis: u64,
}

/// Datastore-backed provider store with an LRU cache.
pub struct ProviderStore {
    datastore: Arc<dyn Datastore>,
    cache: Mutex<LruCache<Vec<u8>, Vec<ProviderEntry>>>,
    provide_validity: Duration,
    cleanup_interval: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ProviderStore {
    /// Create a provider store over the given datastore.
    pub fn new(
        datastore: Arc<dyn Datastore>,
        provide_validity: Duration,
        cleanup_interval: Duration,
        cache_size: usize,
    ) -> Self {
        let capacity =
            std::num::NonZeroUsize::new(cache_size.max(1)).unwrap_or(std::num::NonZeroUsize::MIN);
        Self {
            datastore,
            cache: Mutex::new(LruCache::new(capacity)),
            provide_validity,
            cleanup_interval,
            sweeper: Mutex::new(None),
        }
    }

    /// Register `peer` as a provider for `cid`, refreshing any existing entry.
    pub fn add_provider(&self, cid: &Cid, peer: PeerId) -> Result<()> {
        let now = now_millis();
        self.datastore
            .put(&provider_key(cid, &peer), &now.to_be_bytes())?;

        let mut cache = lock(&self.cache);
        if let Some(entries) = cache.get_mut(cid.as_bytes()) {
            match entries.iter_mut().find(|e| e.peer == peer) {
                Some(entry) => entry.time_millis = now,
                None => entries.push(ProviderEntry {
                    peer,
                    time_millis: now,
                }),
            }
        }

        tracing::debug!(cid = %cid, %peer, "provider registered");
        Ok(())
    }

    /// All unexpired providers for `cid`.
    ///
    /// Serves from the cache when it holds the key; otherwise scans the
    /// datastore, repopulates the cache, and returns the peers in row order.
    pub fn get_providers(&self, cid: &Cid) -> Result<Vec<PeerId>> {
        let now = now_millis();
        let validity = self.provide_validity.as_millis() as u64;

        {
            let mut cache = lock(&self.cache);
            if let Some(entries) = cache.get_mut(cid.as_bytes()) {
                entries.retain(|e| !expired(e.time_millis, validity, now));
                return Ok(entries.iter().map(|e| e.peer).collect());
            }
        }

        let rows = self.datastore.query(&provider_prefix(cid))?;
        let mut entries = Vec::new();
        for (key, value) in rows {
            let Some((peer, time_millis)) = parse_provider_row(&key, &value) else {
                tracing::warn!(key = %key, "malformed provider row, skipping");
                continue;
            };
            if !expired(time_millis, validity, now) {
                entries.push(ProviderEntry { peer, time_millis });
            }
        }

        let peers = entries.iter().map(|e| e.peer).collect();
        lock(&self.cache).put(cid.as_bytes().to_vec(), entries);
        Ok(peers)
    }

    /// Number of unexpired provider records across all content keys.
    pub fn len(&self) -> Result<usize> {
        let now = now_millis();
        let validity = self.provide_validity.as_millis() as u64;
        let rows = self.datastore.query("/providers/")?;
        Ok(rows
            .iter()
            .filter_map(|(k, v)| parse_provider_row(k, v))
            .filter(|(_, t)| !expired(*t, validity, now))
            .count())
    }

    /// Whether no unexpired provider records exist.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Delete every expired provider row. Returns the number removed.
    pub fn cleanup(&self) -> Result<usize> {
        let now = now_millis();
        let validity = self.provide_validity.as_millis() as u64;

        let rows = self.datastore.query("/providers/")?;
        let mut removed = 0usize;
        for (key, value) in rows {
            let stale = match parse_provider_row(&key, &value) {
                Some((_, time_millis)) => expired(time_millis, validity, now),
                None => true,
            };
            if stale {
                self.datastore.delete(&key)?;
                removed += 1;
            }
        }

        let mut cache = lock(&self.cache);
        for (_, entries) in cache.iter_mut() {
            entries.retain(|e| !expired(e.time_millis, validity, now));
        }

        if removed > 0 {
            tracing::debug!(removed, "provider cleanup swept expired records");
        }
        Ok(removed)
    }

    /// Start the periodic cleanup sweep.
    ///
    /// A second call replaces the previous sweeper.
    pub fn start_sweeper(self: &Arc<Self>) {
        let store = Arc::clone(self);
        let interval = self.cleanup_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so tests with
            // millisecond intervals see one full period before the sweep.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = store.cleanup() {
                    tracing::warn!(error = %e, "provider cleanup failed");
                }
            }
        });
        if let Some(old) = lock(&self.sweeper).replace(handle) {
            old.abort();
        }
    }

    /// Cancel the periodic cleanup sweep.
    ///
    /// Idempotent, and safe to call when the sweeper never started.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.sweeper).take() {
            handle.abort();
        }
    }
}

impl Drop for ProviderStore {
    fn drop(&mut self) {
        self.stop();
    }
}

fn expired(time_millis: u64, validity_millis: u64, now: u64) -> bool {
    now.saturating_sub(time_millis) > validity_millis
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Datastore key for one (cid, peer) provider record.
fn provider_key(cid: &Cid, peer: &PeerId) -> String {
    format!(
        "/providers/{}/{}",
        hex::encode(cid.as_bytes()),
        hex::encode(peer.as_bytes())
    )
}

/// Datastore key prefix covering all providers of a cid.
fn provider_prefix(cid: &Cid) -> String {
    format!("/providers/{}/", hex::encode(cid.as_bytes()))
}

/// Parse a provider row back into (peer, timestamp).
fn parse_provider_row(key: &str, value: &[u8]) -> Option<(PeerId, u64)> {
    let peer_hex = key.rsplit('/').next()?;
    let peer_bytes = hex::decode(peer_hex).ok()?;
    let peer = PeerId::try_from_slice(&peer_bytes).ok()?;
    let time_bytes: [u8; 8] = value.try_into().ok()?;
    Some((peer, u64::from_be_bytes(time_bytes)))
}
