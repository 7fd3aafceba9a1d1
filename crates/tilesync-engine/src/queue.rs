//! Per-peer delivery queues.

use crate::transport::PeerId;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tilesync_store::TileId;

/// Ordered tile ids pending delivery to one peer.
///
/// Appending the id that is already at the tail is a no-op, so bursts of
/// updates to one tile do not queue visible back-to-back duplicates.
#[derive(Debug, Default, Clone)]
pub struct DeliveryQueue {
    entries: VecDeque<TileId>,
}

impl DeliveryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id` unless it is already the most recent entry.
    pub fn push(&mut self, id: TileId) -> bool {
        if self.entries.back() == Some(&id) {
            return false;
        }
        self.entries.push_back(id);
        true
    }

    /// The next id to deliver.
    pub fn head(&self) -> Option<&TileId> {
        self.entries.front()
    }

    /// Remove every occurrence of `id`, returning whether any was present.
    pub fn remove(&mut self, id: &TileId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|queued| queued != id);
        self.entries.len() != before
    }

    /// Whether `id` is queued.
    pub fn contains(&self, id: &TileId) -> bool {
        self.entries.contains(id)
    }

    /// Pop the head.
    pub fn pop(&mut self) -> Option<TileId> {
        self.entries.pop_front()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate in delivery order.
    pub fn iter(&self) -> impl Iterator<Item = &TileId> {
        self.entries.iter()
    }
}

/// All peers' queues, iterated in a fixed order (by [`PeerId`]).
///
/// The outer map is only write-locked to add or drop a peer; each queue has
/// its own lock so enqueueing for one peer does not block another.
#[derive(Debug, Default)]
pub struct DeliveryQueues {
    queues: RwLock<BTreeMap<PeerId, Arc<Mutex<DeliveryQueue>>>>,
}

impl DeliveryQueues {
    /// Create an empty set of queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `peer` a fresh, empty queue (replacing any previous one).
    pub fn open(&self, peer: &PeerId) {
        self.queues
            .write()
            .insert(peer.clone(), Arc::new(Mutex::new(DeliveryQueue::new())));
    }

    /// Drop `peer`'s queue and everything in it.
    pub fn discard(&self, peer: &PeerId) -> usize {
        self.queues
            .write()
            .remove(peer)
            .map(|queue| queue.lock().len())
            .unwrap_or(0)
    }

    /// Append `id` to `peer`'s queue. Returns false if the peer has no queue
    /// or `id` is already at its tail.
    pub fn enqueue(&self, peer: &PeerId, id: TileId) -> bool {
        let queue = self.queues.read().get(peer).cloned();
        match queue {
            Some(queue) => queue.lock().push(id),
            None => false,
        }
    }

    /// Head of the first non-empty queue in peer order.
    pub fn first_head(&self) -> Option<TileId> {
        self.queues
            .read()
            .values()
            .find_map(|queue| queue.lock().head().cloned())
    }

    /// Remove `id` from every queue holding it and return those peers in
    /// peer order.
    pub fn take_everywhere(&self, id: &TileId) -> Vec<PeerId> {
        self.queues
            .read()
            .iter()
            .filter_map(|(peer, queue)| queue.lock().remove(id).then(|| peer.clone()))
            .collect()
    }

    /// Snapshot of `peer`'s queue in delivery order.
    pub fn snapshot(&self, peer: &PeerId) -> Vec<TileId> {
        self.queues
            .read()
            .get(peer)
            .map(|queue| queue.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total entries across all peers.
    pub fn pending(&self) -> usize {
        self.queues.read().values().map(|queue| queue.lock().len()).sum()
    }

    /// Whether every queue is empty.
    pub fn is_idle(&self) -> bool {
        self.queues.read().values().all(|queue| queue.lock().is_empty())
    }
}
