//! Kademlia routing table with XOR-distance metric and own-range splitting.
//!
//! Peers are bucketed by the length of the common bit prefix between their
//! kad id and the local node's. Bucket `i` holds peers whose prefix length is
//! exactly `i`; the last bucket holds everything at least as close as its
//! index. When the last bucket fills, it splits (up to a configurable depth),
//! because that is the range the local node itself lives in. Any other full
//! bucket keeps its long-lived entries: the caller pings the
//! least-recently-seen peer and only evicts it on a failed liveness check.

use std::collections::VecDeque;
use std::time::Instant;

use cairn_types::{KadId, PeerId, PeerInfo};

/// A peer entry with recency metadata.
#[derive(Clone, Debug)]
struct BucketEntry {
    info: PeerInfo,
    last_seen: Instant,
}

/// A single k-bucket, ordered by last-seen time.
///
/// The front of the deque is the least-recently-seen entry, the back the
/// most-recently-seen.
#[derive(Debug, Default)]
struct Bucket {
    entries: VecDeque<BucketEntry>,
}

impl Bucket {
    fn find_index(&self, id: &PeerId) -> Option<usize> {
        self.entries.iter().position(|e| e.info.id == *id)
    }

    fn touch(&mut self, index: usize, addrs: &[cairn_types::Multiaddr]) {
        if let Some(mut entry) = self.entries.remove(index) {
            entry.last_seen = Instant::now();
            entry.info.merge_addrs(addrs);
            self.entries.push_back(entry);
        }
    }

    fn insert(&mut self, info: PeerInfo) {
        self.entries.push_back(BucketEntry {
            info,
            last_seen: Instant::now(),
        });
    }

    fn remove(&mut self, index: usize) -> Option<PeerInfo> {
        self.entries.remove(index).map(|e| e.info)
    }

    fn least_recently_seen(&self) -> Option<&PeerInfo> {
        self.entries.front().map(|e| &e.info)
    }
}

/// Result of attempting to add a peer to the routing table.
#[derive(Clone, Debug)]
pub enum AddOutcome {
    /// The peer was newly inserted into a bucket.
    Inserted,
    /// The peer was already present; its recency and addresses were updated.
    Refreshed,
    /// The peer is the local node and was ignored.
    SelfEntry,
    /// The target bucket is full and may not split. Carries the
    /// least-recently-seen entry for the caller to liveness-check.
    Full {
        /// Eviction candidate: the least-recently-seen peer in the bucket.
        least_recently_seen: PeerInfo,
    },
}

/// The Kademlia routing table.
pub struct RoutingTable {
    local_id: PeerId,
    local_kad: KadId,
    buckets: Vec<Bucket>,
    k: usize,
    max_buckets: usize,
}

impl RoutingTable {
    /// Create a routing table for the given local peer.
    pub fn new(local_id: PeerId, k: usize, max_buckets: usize) -> Self {
        Self {
            local_id,
            local_kad: local_id.kad_id(),
            buckets: vec![Bucket::default()],
            k,
            max_buckets,
        }
    }

    /// The local peer id this table routes around.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Bucket index for a kad id: the common prefix length with the local
    /// node, clamped to the current table depth.
    fn bucket_index(&self, kad: &KadId) -> usize {
        self.local_kad.common_prefix_len(kad).min(self.buckets.len() - 1)
    }

    /// Add a peer.
    ///
    /// - Already present: refresh recency and addresses.
    /// - Room in the bucket: insert.
    /// - Full last bucket with depth to spare: split and retry.
    /// - Otherwise: return [`AddOutcome::Full`] so the caller can ping the
    ///   least-recently-seen entry and call [`RoutingTable::evict_and_insert`]
    ///   if it proves dead.
    pub fn add(&mut self, info: PeerInfo) -> AddOutcome {
        if info.id == self.local_id {
            return AddOutcome::SelfEntry;
        }

        let kad = info.id.kad_id();
        loop {
            let idx = self.bucket_index(&kad);
            let can_split =
                idx == self.buckets.len() - 1 && self.buckets.len() < self.max_buckets;

            if let Some(pos) = self.buckets[idx].find_index(&info.id) {
                self.buckets[idx].touch(pos, &info.addrs);
                return AddOutcome::Refreshed;
            }

            if self.buckets[idx].entries.len() < self.k {
                self.buckets[idx].insert(info);
                return AddOutcome::Inserted;
            }

            if can_split {
                self.split_last_bucket();
                continue;
            }

            let lrs = self.buckets[idx]
                .least_recently_seen()
                .cloned()
                .unwrap_or_else(|| info.clone());
            return AddOutcome::Full {
                least_recently_seen: lrs,
            };
        }
    }

    /// Split the last bucket: entries at least one bit closer than its index
    /// move into a new bucket appended after it.
    fn split_last_bucket(&mut self) {
        let local_kad = self.local_kad;
        let old_index = self.buckets.len() - 1;
        let old = &mut self.buckets[old_index];

        let mut near = Bucket::default();
        let mut remaining = VecDeque::with_capacity(old.entries.len());
        while let Some(entry) = old.entries.pop_front() {
            let cpl = local_kad.common_prefix_len(&entry.info.id.kad_id());
            if cpl > old_index {
                near.entries.push_back(entry);
            } else {
                remaining.push_back(entry);
            }
        }
        old.entries = remaining;
        self.buckets.push(near);

        tracing::debug!(
            depth = self.buckets.len(),
            "routing table bucket split"
        );
    }

    /// Replace a stale entry with a newcomer after a failed liveness check.
    ///
    /// No-op returning `false` if the stale peer is no longer in the table.
    pub fn evict_and_insert(&mut self, stale: &PeerId, newcomer: PeerInfo) -> bool {
        let idx = self.bucket_index(&stale.kad_id());
        let bucket = &mut self.buckets[idx];
        match bucket.find_index(stale) {
            Some(pos) => {
                bucket.remove(pos);
                bucket.insert(newcomer);
                true
            }
            None => false,
        }
    }

    /// Mark a peer as just seen, refreshing its recency.
    pub fn touch(&mut self, id: &PeerId) {
        let idx = self.bucket_index(&id.kad_id());
        let bucket = &mut self.buckets[idx];
        if let Some(pos) = bucket.find_index(id) {
            bucket.touch(pos, &[]);
        }
    }

    /// Remove a peer. No-op if absent.
    pub fn remove(&mut self, id: &PeerId) -> Option<PeerInfo> {
        let idx = self.bucket_index(&id.kad_id());
        let bucket = &mut self.buckets[idx];
        let pos = bucket.find_index(id)?;
        bucket.remove(pos)
    }

    /// Look up a peer by id.
    pub fn find(&self, id: &PeerId) -> Option<&PeerInfo> {
        let idx = self.bucket_index(&id.kad_id());
        self.buckets[idx]
            .entries
            .iter()
            .find(|e| e.info.id == *id)
            .map(|e| &e.info)
    }

    /// The `count` closest known peers to `target`.
    ///
    /// Buckets are visited outward from the one covering the target until
    /// enough candidates are gathered; candidates are then ordered by exact
    /// XOR distance.
    pub fn closest_peers(&self, target: &KadId, count: usize) -> Vec<PeerInfo> {
        let center = self.bucket_index(target);
        let mut candidates: Vec<PeerInfo> = Vec::new();

        for offset in 0..self.buckets.len() {
            if offset <= center {
                let bucket = &self.buckets[center - offset];
                candidates.extend(bucket.entries.iter().map(|e| e.info.clone()));
            }
            if offset > 0 && center + offset < self.buckets.len() {
                let bucket = &self.buckets[center + offset];
                candidates.extend(bucket.entries.iter().map(|e| e.info.clone()));
            }
            if candidates.len() >= count {
                break;
            }
        }

        candidates.sort_by_key(|p| target.distance(&p.id.kad_id()));
        candidates.truncate(count);
        candidates
    }

    /// Total number of peers across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }

    /// Whether the table holds no peers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Size of the largest bucket.
    pub fn max_bucket_len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.entries.len())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(seed: u8) -> PeerInfo {
        PeerInfo::new(PeerId::from_bytes([seed; 32]))
    }

    /// Mine a random peer whose kad id shares at least `bits` prefix bits
    /// with `local`.
    fn peer_with_cpl_at_least(local: &KadId, bits: usize) -> PeerInfo {
        loop {
            let candidate = PeerId::random();
            if local.common_prefix_len(&candidate.kad_id()) >= bits {
                return PeerInfo::new(candidate);
            }
        }
    }

    /// Mine a random peer whose kad id shares exactly zero prefix bits
    /// with `local`.
    fn peer_with_cpl_zero(local: &KadId) -> PeerInfo {
        loop {
            let candidate = PeerId::random();
            if local.common_prefix_len(&candidate.kad_id()) == 0 {
                return PeerInfo::new(candidate);
            }
        }
    }

    #[test]
    fn test_add_then_find() {
        let mut table = RoutingTable::new(PeerId::from_bytes([0u8; 32]), 20, 32);
        let p = peer(1);
        assert!(matches!(table.add(p.clone()), AddOutcome::Inserted));
        assert_eq!(table.find(&p.id).map(|i| i.id), Some(p.id));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_re_add_refreshes() {
        let mut table = RoutingTable::new(PeerId::from_bytes([0u8; 32]), 20, 32);
        let p = peer(1);
        table.add(p.clone());
        assert!(matches!(table.add(p), AddOutcome::Refreshed));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_self_is_ignored() {
        let local = PeerId::from_bytes([9u8; 32]);
        let mut table = RoutingTable::new(local, 20, 32);
        assert!(matches!(
            table.add(PeerInfo::new(local)),
            AddOutcome::SelfEntry
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_refresh_merges_addrs() {
        let mut table = RoutingTable::new(PeerId::from_bytes([0u8; 32]), 20, 32);
        let id = PeerId::from_bytes([1u8; 32]);
        table.add(PeerInfo::new(id));

        let addr = cairn_types::Multiaddr::parse("/ip4/10.0.0.1/udp/1").expect("addr");
        table.add(PeerInfo::with_addrs(id, vec![addr.clone()]));
        assert_eq!(table.find(&id).expect("present").addrs, vec![addr]);
    }

    #[test]
    fn test_remove() {
        let mut table = RoutingTable::new(PeerId::from_bytes([0u8; 32]), 20, 32);
        let p = peer(1);
        table.add(p.clone());
        assert!(table.remove(&p.id).is_some());
        assert!(table.find(&p.id).is_none());
        assert!(table.remove(&p.id).is_none());
    }

    #[test]
    fn test_own_range_bucket_splits_instead_of_filling() {
        let local = PeerId::random();
        let local_kad = local.kad_id();
        // Small k so splits trigger quickly.
        let mut table = RoutingTable::new(local, 2, 16);

        for _ in 0..6 {
            let p = peer_with_cpl_at_least(&local_kad, 1);
            assert!(matches!(table.add(p), AddOutcome::Inserted));
        }
        assert!(table.bucket_count() > 1, "last bucket should have split");
        assert_eq!(table.len(), 6);
        assert!(table.max_bucket_len() <= 2);
    }

    #[test]
    fn test_far_bucket_reports_full() {
        let local = PeerId::random();
        let local_kad = local.kad_id();
        let mut table = RoutingTable::new(local, 2, 16);

        // Force depth past 1 so bucket 0 (cpl == 0) is no longer the last.
        for _ in 0..3 {
            table.add(peer_with_cpl_at_least(&local_kad, 1));
        }
        assert!(table.bucket_count() > 1);

        let first = peer_with_cpl_zero(&local_kad);
        table.add(first.clone());
        table.add(peer_with_cpl_zero(&local_kad));

        let outcome = table.add(peer_with_cpl_zero(&local_kad));
        match outcome {
            AddOutcome::Full {
                least_recently_seen,
            } => assert_eq!(least_recently_seen.id, first.id),
            other => unreachable!("expected Full, got {other:?}"),
        }
    }

    #[test]
    fn test_evict_and_insert() {
        let local = PeerId::random();
        let local_kad = local.kad_id();
        let mut table = RoutingTable::new(local, 2, 1);

        let a = peer_with_cpl_zero(&local_kad);
        let b = peer_with_cpl_zero(&local_kad);
        table.add(a.clone());
        table.add(b);

        let newcomer = peer_with_cpl_zero(&local_kad);
        assert!(matches!(
            table.add(newcomer.clone()),
            AddOutcome::Full { .. }
        ));
        assert!(table.evict_and_insert(&a.id, newcomer.clone()));
        assert!(table.find(&a.id).is_none());
        assert!(table.find(&newcomer.id).is_some());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_evict_absent_peer_is_noop() {
        let mut table = RoutingTable::new(PeerId::random(), 2, 1);
        assert!(!table.evict_and_insert(&PeerId::random(), peer(1)));
    }

    #[test]
    fn test_closest_peers_sorted_by_distance() {
        let mut table = RoutingTable::new(PeerId::random(), 20, 32);
        for _ in 0..50 {
            table.add(PeerInfo::new(PeerId::random()));
        }

        let target = KadId::hash(b"some-key");
        let closest = table.closest_peers(&target, 10);
        assert_eq!(closest.len(), 10);
        for pair in closest.windows(2) {
            let d0 = target.distance(&pair[0].id.kad_id());
            let d1 = target.distance(&pair[1].id.kad_id());
            assert!(d0 <= d1, "closest_peers not sorted by distance");
        }
    }

    #[test]
    fn test_closest_peers_returns_all_when_fewer_than_count() {
        let mut table = RoutingTable::new(PeerId::random(), 20, 32);
        for _ in 0..3 {
            table.add(PeerInfo::new(PeerId::random()));
        }
        assert_eq!(table.closest_peers(&KadId::hash(b"k"), 10).len(), 3);
    }

    #[test]
    fn test_bucket_never_exceeds_k() {
        let mut table = RoutingTable::new(PeerId::random(), 4, 8);
        for _ in 0..200 {
            table.add(PeerInfo::new(PeerId::random()));
        }
        assert!(table.max_bucket_len() <= 4);
    }
}
