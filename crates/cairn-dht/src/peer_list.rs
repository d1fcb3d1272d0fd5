//! Distance-ordered peer collections.
//!
//! [`PeerList`] keeps distinct peers sorted ascending by XOR distance to a
//! fixed target; [`LimitedPeerList`] adds a capacity cap that keeps only the
//! closest peers seen. Together they back the query engine's frontier: the
//! set of closest known, not-yet-queried peers, popped closest-first.

use cairn_types::{Distance, KadId, PeerId, PeerInfo};

/// Distinct peers sorted ascending by XOR distance to a fixed target.
#[derive(Debug)]
pub struct PeerList {
    target: KadId,
    entries: Vec<(Distance, PeerInfo)>,
}

impl PeerList {
    /// An empty list sorted toward `target`.
    pub fn new(target: KadId) -> Self {
        Self {
            target,
            entries: Vec::new(),
        }
    }

    /// The target this list is sorted toward.
    pub fn target(&self) -> &KadId {
        &self.target
    }

    /// Insert a peer in distance order.
    ///
    /// Returns `false` without modifying the list when the peer is already
    /// present.
    pub fn push(&mut self, info: PeerInfo) -> bool {
        if self.contains(&info.id) {
            return false;
        }
        let distance = self.target.distance(&info.id.kad_id());
        let idx = self
            .entries
            .partition_point(|(d, _)| *d <= distance);
        self.entries.insert(idx, (distance, info));
        true
    }

    /// Whether a peer with this id is present.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.entries.iter().any(|(_, p)| p.id == *id)
    }

    /// Number of peers in the list.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The closest peer, without removing it.
    pub fn closest(&self) -> Option<&PeerInfo> {
        self.entries.first().map(|(_, p)| p)
    }

    /// Remove and return the closest peer.
    pub fn pop_closest(&mut self) -> Option<PeerInfo> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.remove(0).1)
    }

    /// Remove and return the farthest peer.
    pub fn pop_farthest(&mut self) -> Option<PeerInfo> {
        self.entries.pop().map(|(_, p)| p)
    }

    /// Distance of the farthest peer, if any.
    pub fn farthest_distance(&self) -> Option<Distance> {
        self.entries.last().map(|(d, _)| *d)
    }

    /// All peers, closest first.
    pub fn to_vec(&self) -> Vec<PeerInfo> {
        self.entries.iter().map(|(_, p)| p.clone()).collect()
    }
}

/// A [`PeerList`] capped at `capacity` peers.
///
/// At capacity, a new peer closer than the current farthest displaces it;
/// a farther peer is rejected. The list therefore always holds the
/// `capacity` closest distinct peers pushed so far.
#[derive(Debug)]
pub struct LimitedPeerList {
    inner: PeerList,
    capacity: usize,
}

impl LimitedPeerList {
    /// An empty capped list sorted toward `target`.
    pub fn new(target: KadId, capacity: usize) -> Self {
        Self {
            inner: PeerList::new(target),
            capacity,
        }
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert a peer, evicting the farthest if needed.
    ///
    /// Returns `false` when the peer is already present, or when the list is
    /// full and the peer is no closer than the current farthest entry.
    pub fn push(&mut self, info: PeerInfo) -> bool {
        if self.inner.len() < self.capacity {
            return self.inner.push(info);
        }
        if self.inner.contains(&info.id) {
            return false;
        }
        let distance = self.inner.target.distance(&info.id.kad_id());
        match self.inner.farthest_distance() {
            Some(farthest) if distance < farthest => {
                self.inner.pop_farthest();
                self.inner.push(info)
            }
            _ => false,
        }
    }

    /// Whether a peer with this id is present.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.inner.contains(id)
    }

    /// Number of peers in the list.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove and return the closest peer.
    pub fn pop_closest(&mut self) -> Option<PeerInfo> {
        self.inner.pop_closest()
    }

    /// Remove and return the farthest peer.
    pub fn pop_farthest(&mut self) -> Option<PeerInfo> {
        self.inner.pop_farthest()
    }

    /// All peers, closest first.
    pub fn to_vec(&self) -> Vec<PeerInfo> {
        self.inner.to_vec()
    }
}
