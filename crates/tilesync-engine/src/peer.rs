//! The peer side: a participant that renders tiles locally, uploads its
//! changes to the authority and stores what the authority sends back.
//!
//! Local edits reach the outbound queue through the change detector. Tiles
//! written on behalf of the authority are marked in [`ProcessedPaths`] first,
//! so the detector does not bounce them back as local edits.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::locks::{TileLocks, PRUNE_THRESHOLD};
use crate::processed::ProcessedPaths;
use crate::queue::DeliveryQueue;
use crate::transport::AuthorityLink;
use crate::watcher::ChangeDetector;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tilesync_store::{TileId, TileStamp, TileStore};
use tracing::{debug, info, warn};

struct PeerSession {
    store: TileStore,
    processed: Arc<ProcessedPaths>,
    outbound: Arc<Mutex<DeliveryQueue>>,
    locks: TileLocks,
    detector: Mutex<Option<ChangeDetector>>,
}

/// Result of diffing one layer against the authority's availability list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerDiff {
    /// Tiles requested from the authority.
    pub requested: Vec<TileId>,
    /// Local tiles queued for upload.
    pub uploads: Vec<TileId>,
}

/// Peer-side sync engine.
pub struct PeerEngine {
    config: EngineConfig,
    link: Arc<dyn AuthorityLink>,
    session: RwLock<Option<Arc<PeerSession>>>,
}

impl PeerEngine {
    /// Create an uninitialized peer engine.
    pub fn new(config: EngineConfig, link: Arc<dyn AuthorityLink>) -> Self {
        Self {
            config,
            link,
            session: RwLock::new(None),
        }
    }

    /// Start a session on the local tile tree at `root`.
    pub fn init(&self, root: impl AsRef<Path>) -> Result<()> {
        let store = TileStore::open(root)?;
        for world in &self.config.worlds {
            let dir = store.world_dir(world)?;
            fs::create_dir_all(&dir)
                .map_err(|e| Error::Store(tilesync_store::Error::Io { path: dir, source: e }))?;
        }
        info!("Peer initialized at {:?}", store.root());

        let session = PeerSession {
            store,
            processed: Arc::new(ProcessedPaths::new()),
            outbound: Arc::new(Mutex::new(DeliveryQueue::new())),
            locks: TileLocks::new(),
            detector: Mutex::new(None),
        };
        if let Some(previous) = self.session.write().replace(Arc::new(session)) {
            warn!("Replaced a running peer session");
            stop_detector(&previous);
        }
        Ok(())
    }

    /// Stop watching and forget the session's queue, marks and root.
    pub fn shutdown(&self) {
        let Some(session) = self.session.write().take() else {
            return;
        };
        stop_detector(&session);
        let dropped = session.outbound.lock().len();
        session.outbound.lock().clear();
        session.processed.clear();
        info!("Peer shut down ({} pending uploads dropped)", dropped);
    }

    /// Whether a session is running.
    pub fn is_initialized(&self) -> bool {
        self.session.read().is_some()
    }

    /// Local store root of the running session.
    pub fn root(&self) -> Option<PathBuf> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.store.root().to_path_buf())
    }

    fn session(&self) -> Result<Arc<PeerSession>> {
        self.session.read().clone().ok_or(Error::NotInitialized)
    }

    /// Ask the authority to subscribe this peer to `world`, queue every local
    /// tile of `world` for upload, then start watching the local tree.
    ///
    /// Availability lists from the authority later drop the queued tiles it
    /// already holds. A watch failure is returned after the subscription went
    /// out; tiles keep flowing from the authority but local edits are not
    /// uploaded.
    pub fn subscribe(&self, world: &str) -> Result<()> {
        let session = self.session()?;
        let mut local: Vec<TileStamp> = session.store.list_all(world)?.collect();
        local.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        {
            let mut outbound = session.outbound.lock();
            for tile in &local {
                outbound.push(tile.id.clone());
            }
        }
        debug!("Queued {} local tiles of {} for upload", local.len(), world);

        self.link.subscribe(world)?;
        self.start_watching()
    }

    /// Start continuous change detection over every configured world. Does
    /// nothing if it is already running.
    pub fn start_watching(&self) -> Result<()> {
        let session = self.session()?;
        let mut detector = session.detector.lock();
        if detector.is_some() {
            return Ok(());
        }

        let roots = self
            .config
            .worlds
            .iter()
            .map(|world| session.store.world_dir(world))
            .collect::<tilesync_store::Result<Vec<_>>>()?;
        let outbound = Arc::clone(&session.outbound);
        let started = ChangeDetector::spawn(
            &roots,
            Arc::clone(&session.processed),
            self.config.watch_debounce,
            move |id| {
                outbound.lock().push(id);
            },
        );
        match started {
            Ok(started) => {
                *detector = Some(started);
                Ok(())
            }
            Err(e) => {
                warn!("Local change detection unavailable: {}", e);
                Err(e)
            }
        }
    }

    /// Whether change detection is running.
    pub fn is_watching(&self) -> bool {
        self.session()
            .map(|s| s.detector.lock().is_some())
            .unwrap_or(false)
    }

    /// Store a tile sent by the authority if it is new or newer than the
    /// local copy. Returns whether the tile was written.
    pub fn on_tile_received(&self, id: TileId, bytes: Vec<u8>, timestamp: u64) -> bool {
        let session = match self.session() {
            Ok(session) => session,
            Err(e) => {
                warn!("Ignoring tile {}: {}", id, e);
                return false;
            }
        };

        let written = session.locks.with_lock(&id, || -> Result<bool> {
            if let Some(local) = session.store.timestamp(&id)? {
                if local >= timestamp {
                    return Ok(false);
                }
            }
            // Only a running detector consumes marks. Holding its slot keeps
            // detection from starting between the mark and the write.
            let watching = session.detector.lock();
            let path = session.store.path_for(&id)?;
            let marked = watching.is_some();
            if marked {
                session.processed.mark(path.clone());
            }
            if let Err(e) = session.store.put(&id, &bytes, timestamp) {
                if marked {
                    session.processed.consume(&path);
                }
                return Err(e.into());
            }
            Ok(true)
        });

        match written {
            Ok(true) => {
                debug!("Received: {} (ts={})", id, timestamp);
                true
            }
            Ok(false) => {
                debug!("Kept local copy of {}", id);
                false
            }
            Err(e) => {
                warn!("Failed to store {}: {}", id, e);
                false
            }
        }
    }

    /// Diff one layer against the authority's list: request what the
    /// authority holds newer or we lack, queue uploads for what it lacks or
    /// holds older.
    pub fn on_available(&self, world: &str, layer: &str, remote: &[TileStamp]) -> LayerDiff {
        let session = match self.session() {
            Ok(session) => session,
            Err(e) => {
                warn!("Ignoring availability list for {}/{}: {}", world, layer, e);
                return LayerDiff::default();
            }
        };

        let local: HashMap<TileId, u64> = match session.store.list_layer(world, layer) {
            Ok(tiles) => tiles.into_iter().map(|t| (t.id, t.timestamp)).collect(),
            Err(e) => {
                warn!("Cannot list {}/{}: {}", world, layer, e);
                return LayerDiff::default();
            }
        };
        let remote_ts: HashMap<&TileId, u64> = remote.iter().map(|t| (&t.id, t.timestamp)).collect();

        let mut diff = LayerDiff::default();
        let mut in_sync = Vec::new();
        for tile in remote {
            match local.get(&tile.id) {
                Some(ts) if *ts >= tile.timestamp => {}
                _ => diff.requested.push(tile.id.clone()),
            }
        }
        for (id, ts) in &local {
            match remote_ts.get(id) {
                Some(remote) if *remote >= *ts => in_sync.push(id),
                _ => diff.uploads.push(id.clone()),
            }
        }
        diff.requested.sort();
        diff.uploads.sort();

        if !diff.requested.is_empty() {
            if let Err(e) = self.link.request_tiles(world, layer, &diff.requested) {
                warn!("Cannot request tiles of {}/{}: {}", world, layer, e);
            }
        }
        {
            let mut outbound = session.outbound.lock();
            for id in in_sync {
                outbound.remove(id);
            }
            for id in &diff.uploads {
                if !outbound.contains(id) {
                    outbound.push(id.clone());
                }
            }
        }

        debug!(
            "{}/{}: requested {}, uploading {}",
            world,
            layer,
            diff.requested.len(),
            diff.uploads.len()
        );
        diff
    }

    /// Upload at most one queued tile. Returns the id that was sent.
    pub fn on_tick(&self) -> Option<TileId> {
        let session = self.session().ok()?;
        if session.locks.len() > PRUNE_THRESHOLD {
            session.locks.prune();
        }
        let id = session.outbound.lock().pop()?;

        match session.store.get(&id) {
            Ok(Some(tile)) => match self.link.send_tile(&tile) {
                Ok(()) => {
                    debug!("Uploaded {}", id);
                    Some(id)
                }
                Err(e) => {
                    warn!("Failed to upload {}: {}", id, e);
                    None
                }
            },
            Ok(None) => {
                debug!("Skipping upload of vanished tile {}", id);
                None
            }
            Err(e) => {
                warn!("Cannot read {} for upload: {}", id, e);
                None
            }
        }
    }

    /// Number of tiles waiting to be uploaded.
    pub fn pending_uploads(&self) -> usize {
        self.session()
            .map(|s| s.outbound.lock().len())
            .unwrap_or(0)
    }

    /// Snapshot of the upload queue.
    pub fn queued_uploads(&self) -> Vec<TileId> {
        self.session()
            .map(|s| s.outbound.lock().iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn stop_detector(session: &PeerSession) {
    if let Some(detector) = session.detector.lock().take() {
        detector.shutdown();
    }
}

impl std::fmt::Debug for PeerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerEngine")
            .field("config", &self.config)
            .field("root", &self.root())
            .field("watching", &self.is_watching())
            .finish()
    }
}
