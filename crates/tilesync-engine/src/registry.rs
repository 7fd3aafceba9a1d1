//! Which world each connected peer currently cares about.

use crate::transport::PeerId;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// One peer's registered interest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSubscription {
    pub peer: PeerId,
    /// World the peer is currently in.
    pub world: String,
    /// Newest timestamp delivered per world during this session, seeded from
    /// the ledger at subscribe time.
    pub last_sync: HashMap<String, u64>,
}

/// Registry of subscribed peers, keyed and iterated by [`PeerId`].
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    peers: RwLock<BTreeMap<PeerId, PeerSubscription>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer` in `world`, replacing any previous registration.
    /// Returns the previous world, if any.
    pub fn subscribe(&self, peer: &PeerId, world: &str, last_sync: u64) -> Option<String> {
        let mut peers = self.peers.write();
        let previous = peers.remove(peer);
        let mut sync = previous
            .as_ref()
            .map(|s| s.last_sync.clone())
            .unwrap_or_default();
        sync.insert(world.to_string(), last_sync);
        peers.insert(
            peer.clone(),
            PeerSubscription {
                peer: peer.clone(),
                world: world.to_string(),
                last_sync: sync,
            },
        );
        previous.map(|s| s.world)
    }

    /// Drop `peer`'s registration.
    pub fn unsubscribe(&self, peer: &PeerId) -> Option<PeerSubscription> {
        self.peers.write().remove(peer)
    }

    /// World `peer` is subscribed to.
    pub fn world_of(&self, peer: &PeerId) -> Option<String> {
        self.peers.read().get(peer).map(|s| s.world.clone())
    }

    /// Whether `peer` is subscribed.
    pub fn is_subscribed(&self, peer: &PeerId) -> bool {
        self.peers.read().contains_key(peer)
    }

    /// Peers subscribed to `world`, in peer order.
    pub fn peers_in(&self, world: &str) -> Vec<PeerId> {
        self.peers
            .read()
            .values()
            .filter(|s| s.world == world)
            .map(|s| s.peer.clone())
            .collect()
    }

    /// Raise `peer`'s last-sync for `world` to at least `timestamp` and return
    /// the new value, or `None` if the peer is not subscribed.
    pub fn advance_sync(&self, peer: &PeerId, world: &str, timestamp: u64) -> Option<u64> {
        let mut peers = self.peers.write();
        let sub = peers.get_mut(peer)?;
        let entry = sub.last_sync.entry(world.to_string()).or_insert(0);
        *entry = (*entry).max(timestamp);
        Some(*entry)
    }

    #[cfg(test)]
    fn last_sync(&self, peer: &PeerId, world: &str) -> Option<u64> {
        self.peers.read().get(peer)?.last_sync.get(world).copied()
    }

    /// Number of subscribed peers.
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_and_lookup() {
        let registry = SubscriptionRegistry::new();
        let alice = PeerId::from("alice");

        assert_eq!(registry.subscribe(&alice, "overworld", 10), None);
        assert_eq!(registry.world_of(&alice).as_deref(), Some("overworld"));
        assert_eq!(registry.last_sync(&alice, "overworld"), Some(10));
        assert_eq!(registry.peers_in("overworld"), vec![alice.clone()]);
        assert!(registry.peers_in("the_end").is_empty());
    }

    #[test]
    fn resubscribe_reports_previous_world_and_keeps_history() {
        let registry = SubscriptionRegistry::new();
        let alice = PeerId::from("alice");
        registry.subscribe(&alice, "overworld", 10);
        registry.advance_sync(&alice, "overworld", 50);

        assert_eq!(registry.subscribe(&alice, "the_end", 0).as_deref(), Some("overworld"));
        assert_eq!(registry.last_sync(&alice, "overworld"), Some(50));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn advance_sync_is_monotonic() {
        let registry = SubscriptionRegistry::new();
        let alice = PeerId::from("alice");
        registry.subscribe(&alice, "overworld", 100);

        assert_eq!(registry.advance_sync(&alice, "overworld", 50), Some(100));
        assert_eq!(registry.advance_sync(&alice, "overworld", 150), Some(150));
        assert_eq!(registry.advance_sync(&PeerId::from("bob"), "overworld", 1), None);
    }

    #[test]
    fn unsubscribe_removes_peer() {
        let registry = SubscriptionRegistry::new();
        let alice = PeerId::from("alice");
        registry.subscribe(&alice, "overworld", 0);

        assert!(registry.unsubscribe(&alice).is_some());
        assert!(!registry.is_subscribed(&alice));
        assert!(registry.is_empty());
    }
}
