//! Rate-limited delivery: one tile per tick, system-wide.

use crate::queue::DeliveryQueues;
use crate::transport::{PeerId, PeerTransport};
use std::sync::Arc;
use tilesync_store::{TileId, TileRecord, TileStore};
use tracing::{debug, warn};

/// Whether any delivery work is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Every queue is empty.
    Idle,
    /// At least one queue holds an id.
    Draining,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was queued.
    Idle,
    /// The tile was sent to `delivered`; sends to `failed` errored.
    Dispatched {
        id: TileId,
        timestamp: u64,
        delivered: Vec<PeerId>,
        failed: Vec<PeerId>,
    },
    /// The tile could not be loaded and was removed from every queue.
    Dropped { id: TileId },
}

/// Drains [`DeliveryQueues`] one tile at a time.
///
/// Each tick takes the head of the first non-empty queue in peer order and
/// sends the tile's current bytes to every peer that has it queued. Once sent
/// the id is gone from all queues, so the next tick naturally starts from a
/// different peer's head.
#[derive(Debug, Clone)]
pub struct DeliveryScheduler {
    queues: Arc<DeliveryQueues>,
}

impl DeliveryScheduler {
    pub fn new(queues: Arc<DeliveryQueues>) -> Self {
        Self { queues }
    }

    pub fn state(&self) -> SchedulerState {
        if self.queues.is_idle() {
            SchedulerState::Idle
        } else {
            SchedulerState::Draining
        }
    }

    /// Run one scheduling step.
    ///
    /// `on_delivered` is called once per peer that received the tile.
    pub fn tick<F>(&self, store: &TileStore, transport: &dyn PeerTransport, mut on_delivered: F) -> TickOutcome
    where
        F: FnMut(&PeerId, &TileRecord),
    {
        if self.state() == SchedulerState::Idle {
            return TickOutcome::Idle;
        }
        let Some(id) = self.queues.first_head() else {
            return TickOutcome::Idle;
        };

        let tile = match store.get(&id) {
            Ok(Some(tile)) => tile,
            Ok(None) => {
                let peers = self.queues.take_everywhere(&id);
                debug!("Dropped {} for {} peer(s): tile no longer exists", id, peers.len());
                return TickOutcome::Dropped { id };
            }
            Err(e) => {
                let peers = self.queues.take_everywhere(&id);
                warn!("Dropped {} for {} peer(s): {}", id, peers.len(), e);
                return TickOutcome::Dropped { id };
            }
        };

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for peer in self.queues.take_everywhere(&id) {
            match transport.send(&peer, &tile) {
                Ok(()) => {
                    on_delivered(&peer, &tile);
                    delivered.push(peer);
                }
                Err(e) => {
                    warn!("Failed to send {} to {}: {}", id, peer, e);
                    failed.push(peer);
                }
            }
        }
        debug!("Dispatched {} to {} peer(s)", id, delivered.len());

        TickOutcome::Dispatched {
            timestamp: tile.modified_at,
            id,
            delivered,
            failed,
        }
    }
}
