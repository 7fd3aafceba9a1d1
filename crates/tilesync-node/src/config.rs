//! Node configuration.

use std::path::PathBuf;
use tilesync_engine::{EngineConfig, Error, PeerId, Result};

/// Everything the node binary needs: the engine settings plus where the
/// local peer keeps its tiles and where the ledger lives.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub engine: EngineConfig,

    /// Root of the local peer's tile tree.
    pub peer_root: PathBuf,

    /// World the local peer subscribes to.
    pub peer_world: String,

    /// Name of the local peer.
    pub peer_id: PeerId,

    /// Last-sync ledger file.
    pub ledger: PathBuf,

    /// Ticks between two statistics log lines.
    pub stats_every: u64,
}

impl NodeConfig {
    /// Create config from environment variables on top of
    /// [`EngineConfig::from_env`].
    ///
    /// - `TILESYNC_PEER_ROOT`: peer tile tree (default `<root>-peer`)
    /// - `TILESYNC_PEER_WORLD`: world the peer joins (default: first world)
    /// - `TILESYNC_PEER_ID`: peer name (default `local`)
    /// - `TILESYNC_LEDGER`: ledger file (default `<root>/last_sync.json`)
    pub fn from_env() -> Result<Self> {
        let engine = EngineConfig::from_env()?;

        let peer_root = std::env::var("TILESYNC_PEER_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_peer_root(&engine.root));

        let peer_world = match std::env::var("TILESYNC_PEER_WORLD") {
            Ok(world) => world,
            Err(_) => engine
                .worlds
                .first()
                .cloned()
                .ok_or_else(|| Error::Config("no world for the local peer".into()))?,
        };
        if !engine.worlds.contains(&peer_world) {
            return Err(Error::Config(format!(
                "TILESYNC_PEER_WORLD {:?} is not one of {:?}",
                peer_world, engine.worlds
            )));
        }

        let peer_id = std::env::var("TILESYNC_PEER_ID")
            .map(PeerId::from)
            .unwrap_or_else(|_| PeerId::from("local"));

        let ledger = std::env::var("TILESYNC_LEDGER")
            .map(PathBuf::from)
            .unwrap_or_else(|_| engine.root.join("last_sync.json"));

        Ok(Self {
            engine,
            peer_root,
            peer_world,
            peer_id,
            ledger,
            stats_every: 1200,
        })
    }
}

fn default_peer_root(root: &std::path::Path) -> PathBuf {
    let mut name = root.as_os_str().to_os_string();
    name.push("-peer");
    PathBuf::from(name)
}
