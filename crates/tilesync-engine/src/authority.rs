//! The authority: holds the union of every peer's tiles, merges uploads and
//! fans the results back out.
//!
//! An [`Authority`] is an explicit engine object with an `init` / `shutdown`
//! lifecycle. All per-session state lives in a [`Session`] created by `init`
//! and dropped by `shutdown`, so nothing survives into the next session.
//!
//! Inbound entry points (`on_tile_received`, `on_subscribe_request`,
//! `on_catchup_request`, `on_peer_disconnect`, `on_world_changed`) and the
//! periodic `on_tick` are called by the host's transport adapter. Per-tile
//! failures are logged and counted, never returned.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::index::TileIndex;
use crate::ledger::SyncLedger;
use crate::locks::{TileLocks, PRUNE_THRESHOLD};
use crate::queue::DeliveryQueues;
use crate::reconcile::{reconcile, Reconciliation};
use crate::registry::SubscriptionRegistry;
use crate::scheduler::{DeliveryScheduler, SchedulerState, TickOutcome};
use crate::transport::{PeerId, PeerTransport};
use crate::watcher::scan;
use parking_lot::RwLock;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tilesync_store::{check_component, TileId, TileRecord, TileStore};
use tracing::{debug, error, info, trace, warn};

/// Diagnostic counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthorityStats {
    /// Uploads received from peers
    pub tiles_received: u64,
    /// Uploads of tiles the authority did not have yet
    pub tiles_created: u64,
    /// Uploads that changed an existing tile
    pub tiles_merged: u64,
    /// Uploads that left the stored tile as it was
    pub tiles_unchanged: u64,
    /// Uploads rejected because an image could not be decoded
    pub decode_failures: u64,
    /// Uploads aborted by a storage error
    pub io_failures: u64,
    /// Ticks that sent a tile
    pub dispatched: u64,
    /// Individual sends that failed
    pub send_failures: u64,
    /// Tiles known to the index
    pub indexed_tiles: usize,
    /// Currently subscribed peers
    pub subscribed_peers: usize,
    /// Queue entries awaiting delivery
    pub pending_deliveries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    created: AtomicU64,
    merged: AtomicU64,
    unchanged: AtomicU64,
    decode_failures: AtomicU64,
    io_failures: AtomicU64,
    dispatched: AtomicU64,
    send_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State owned by one `init`..`shutdown` session.
#[derive(Debug)]
struct Session {
    store: TileStore,
    index: TileIndex,
    registry: SubscriptionRegistry,
    queues: Arc<DeliveryQueues>,
    scheduler: DeliveryScheduler,
    locks: TileLocks,
    counters: Counters,
}

/// Authority-side sync engine.
pub struct Authority {
    config: EngineConfig,
    transport: Arc<dyn PeerTransport>,
    ledger: Arc<dyn SyncLedger>,
    session: RwLock<Option<Arc<Session>>>,
}

impl Authority {
    /// Create an uninitialized authority.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn PeerTransport>,
        ledger: Arc<dyn SyncLedger>,
    ) -> Self {
        Self {
            config,
            transport,
            ledger,
            session: RwLock::new(None),
        }
    }

    /// Start a session rooted at `root`.
    ///
    /// Creates a directory for every configured world and seeds the timestamp
    /// index from a full scan. A running session is replaced by a fresh one.
    pub fn init(&self, root: impl AsRef<Path>) -> Result<()> {
        let store = TileStore::open(root)?;
        for world in &self.config.worlds {
            let dir = store.world_dir(world)?;
            fs::create_dir_all(&dir)
                .map_err(|e| Error::Store(tilesync_store::Error::Io { path: dir, source: e }))?;
        }

        let index = TileIndex::new();
        let seeded = index.extend(scan(&store, &self.config.worlds));
        info!(
            "Authority initialized at {:?}: {} tiles in {} world(s)",
            store.root(),
            seeded,
            self.config.worlds.len()
        );

        let queues = Arc::new(DeliveryQueues::new());
        let session = Session {
            store,
            index,
            registry: SubscriptionRegistry::new(),
            scheduler: DeliveryScheduler::new(Arc::clone(&queues)),
            queues,
            locks: TileLocks::new(),
            counters: Counters::default(),
        };

        if self.session.write().replace(Arc::new(session)).is_some() {
            warn!("Replaced a running authority session");
        }
        Ok(())
    }

    /// End the session, dropping every registration, queue and index entry.
    pub fn shutdown(&self) {
        if let Some(session) = self.session.write().take() {
            info!(
                "Authority shut down ({} peers, {} pending deliveries dropped)",
                session.registry.len(),
                session.queues.pending()
            );
        }
    }

    /// Whether a session is running.
    pub fn is_initialized(&self) -> bool {
        self.session.read().is_some()
    }

    /// Store root of the running session.
    pub fn root(&self) -> Option<PathBuf> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.store.root().to_path_buf())
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session.read().clone().ok_or(Error::NotInitialized)
    }

    fn active(&self, operation: &str) -> Option<Arc<Session>> {
        match self.session() {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("Ignoring {}: {}", operation, e);
                None
            }
        }
    }

    /// Merge a tile uploaded by `sender` and queue the result for every peer
    /// in the tile's world that needs it.
    ///
    /// Returns `None` if the upload was rejected.
    pub fn on_tile_received(
        &self,
        sender: &PeerId,
        id: TileId,
        bytes: Vec<u8>,
        timestamp: u64,
    ) -> Option<Reconciliation> {
        let session = self.active("tile upload")?;
        bump(&session.counters.received);

        let incoming = TileRecord::new(id.clone(), bytes, timestamp);
        let outcome = session.locks.with_lock(&id, || -> Result<(Reconciliation, bool)> {
            let existing = session.store.get(&id)?;
            let created = existing.is_none();
            reconcile(&session.store, existing, incoming).map(|r| (r, created))
        });

        let (reconciliation, created) = match outcome {
            Ok(result) => result,
            Err(e @ Error::Decode { .. }) => {
                bump(&session.counters.decode_failures);
                warn!("Rejected {} from {}: {}", id, sender, e);
                return None;
            }
            Err(e) => {
                bump(&session.counters.io_failures);
                error!("Failed to merge {} from {}: {}", id, sender, e);
                return None;
            }
        };

        if !reconciliation.changed {
            bump(&session.counters.unchanged);
            debug!("Unchanged: {} from {}", id, sender);
            return Some(reconciliation);
        }

        bump(if created {
            &session.counters.created
        } else {
            &session.counters.merged
        });
        session
            .index
            .record(id.clone(), reconciliation.result.modified_at);
        self.fan_out(&session, sender, &id, reconciliation.notify_sender);
        Some(reconciliation)
    }

    fn fan_out(&self, session: &Session, sender: &PeerId, id: &TileId, notify_sender: bool) {
        let mut queued = 0;
        for peer in session.registry.peers_in(&id.world) {
            if &peer == sender && !notify_sender {
                continue;
            }
            if session.queues.enqueue(&peer, id.clone()) {
                queued += 1;
            }
        }
        debug!("Queued {} for {} peer(s)", id, queued);
    }

    /// Subscribe `peer` to `world` and queue everything it missed since its
    /// last recorded sync.
    ///
    /// The peer also receives one availability list per layer so it can
    /// request tiles it lacks. Returns the number of tiles queued.
    pub fn on_subscribe_request(&self, peer: &PeerId, world: &str) -> usize {
        let Some(session) = self.active("subscribe") else {
            return 0;
        };
        if let Err(e) = check_component(world) {
            warn!("Rejected subscription of {}: {}", peer, e);
            return 0;
        }
        self.subscribe(&session, peer, world)
    }

    fn subscribe(&self, session: &Session, peer: &PeerId, world: &str) -> usize {
        let last_sync = match self.ledger.last_sync(peer, world) {
            Ok(ts) => ts,
            Err(e) => {
                warn!("Cannot read last sync of {} in {}: {}", peer, world, e);
                0
            }
        };

        session.registry.subscribe(peer, world, last_sync);
        session.queues.open(peer);

        let missed = session.index.newer_than(world, last_sync);
        let queued = missed.len();
        for tile in missed {
            session.queues.enqueue(peer, tile.id);
        }
        info!(
            "{} subscribed to {} (last sync {}): {} tiles queued",
            peer, world, last_sync, queued
        );

        for (layer, tiles) in session.index.by_layer(world) {
            if let Err(e) = self.transport.broadcast_available(peer, world, &layer, &tiles) {
                warn!("Cannot announce {}/{} to {}: {}", world, layer, peer, e);
            }
        }
        queued
    }

    /// Queue specific tiles a subscribed peer asked for.
    ///
    /// Ids outside the peer's world or missing from the store are ignored.
    /// Returns the number of tiles queued.
    pub fn on_catchup_request(&self, peer: &PeerId, world: &str, ids: &[TileId]) -> usize {
        let Some(session) = self.active("catch-up request") else {
            return 0;
        };
        if session.registry.world_of(peer).as_deref() != Some(world) {
            warn!("Ignoring catch-up request from {} for unsubscribed world {}", peer, world);
            return 0;
        }

        let mut queued = 0;
        for id in ids {
            if id.world != world {
                continue;
            }
            match session.store.exists(id) {
                Ok(true) => {
                    if session.queues.enqueue(peer, id.clone()) {
                        queued += 1;
                    }
                }
                Ok(false) => debug!("{} requested missing tile {}", peer, id),
                Err(e) => warn!("Cannot check {} for {}: {}", id, peer, e),
            }
        }
        debug!("Queued {} requested tiles for {}", queued, peer);
        queued
    }

    /// Forget `peer` and drop its queue.
    pub fn on_peer_disconnect(&self, peer: &PeerId) {
        let Some(session) = self.active("disconnect") else {
            return;
        };
        let dropped = session.queues.discard(peer);
        if session.registry.unsubscribe(peer).is_some() {
            info!("{} disconnected ({} pending deliveries dropped)", peer, dropped);
        }
    }

    /// Move `peer` to `world`.
    ///
    /// A no-op when the peer never subscribed or is already in `world`;
    /// otherwise equivalent to a disconnect followed by a subscription.
    /// Returns the number of tiles queued.
    pub fn on_world_changed(&self, peer: &PeerId, world: &str) -> usize {
        let Some(session) = self.active("world change") else {
            return 0;
        };
        if !session.registry.is_subscribed(peer) {
            trace!("Ignoring world change of unsubscribed {}", peer);
            return 0;
        }
        if session.registry.world_of(peer).as_deref() == Some(world) {
            return 0;
        }
        if let Err(e) = check_component(world) {
            warn!("Rejected world change of {}: {}", peer, e);
            return 0;
        }
        session.queues.discard(peer);
        session.registry.unsubscribe(peer);
        self.subscribe(&session, peer, world)
    }

    /// One scheduling step: deliver at most one tile.
    pub fn on_tick(&self) -> TickOutcome {
        let Some(session) = self.active("tick") else {
            return TickOutcome::Idle;
        };

        let outcome = session
            .scheduler
            .tick(&session.store, self.transport.as_ref(), |peer, tile| {
                let world = &tile.id.world;
                let Some(synced) = session.registry.advance_sync(peer, world, tile.modified_at)
                else {
                    return;
                };
                if let Err(e) = self.ledger.record_sync(peer, world, synced) {
                    warn!("Cannot record sync of {} in {}: {}", peer, world, e);
                }
            });

        if let TickOutcome::Dispatched { failed, .. } = &outcome {
            bump(&session.counters.dispatched);
            session
                .counters
                .send_failures
                .fetch_add(failed.len() as u64, Ordering::Relaxed);
        }

        if session.locks.len() > PRUNE_THRESHOLD {
            let pruned = session.locks.prune();
            debug!("Pruned {} idle tile locks", pruned);
        }
        outcome
    }

    /// Diagnostic counters of the running session (all zero when stopped).
    pub fn stats(&self) -> AuthorityStats {
        let Ok(session) = self.session() else {
            return AuthorityStats::default();
        };
        let c = &session.counters;
        AuthorityStats {
            tiles_received: c.received.load(Ordering::Relaxed),
            tiles_created: c.created.load(Ordering::Relaxed),
            tiles_merged: c.merged.load(Ordering::Relaxed),
            tiles_unchanged: c.unchanged.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            io_failures: c.io_failures.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            indexed_tiles: session.index.len(),
            subscribed_peers: session.registry.len(),
            pending_deliveries: session.queues.pending(),
        }
    }

    /// Whether anything is waiting to be delivered.
    pub fn scheduler_state(&self) -> SchedulerState {
        self.session()
            .map(|s| s.scheduler.state())
            .unwrap_or(SchedulerState::Idle)
    }

    /// Tiles queued for `peer`, in delivery order.
    pub fn queued_for(&self, peer: &PeerId) -> Vec<TileId> {
        self.session()
            .map(|s| s.queues.snapshot(peer))
            .unwrap_or_default()
    }

    /// World `peer` is subscribed to.
    pub fn world_of(&self, peer: &PeerId) -> Option<String> {
        self.session().ok()?.registry.world_of(peer)
    }

    /// Current stored version of a tile.
    pub fn tile(&self, id: &TileId) -> Result<Option<TileRecord>> {
        Ok(self.session()?.store.get(id)?)
    }

    /// Indexed timestamp of a tile.
    pub fn indexed_timestamp(&self, id: &TileId) -> Option<u64> {
        self.session().ok()?.index.timestamp(id)
    }
}

impl std::fmt::Debug for Authority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authority")
            .field("config", &self.config)
            .field("root", &self.root())
            .finish()
    }
}
