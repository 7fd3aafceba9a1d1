//! Boundaries to the transport/codec layer.
//!
//! The engine never frames or delivers messages itself. The host adapter
//! calls the engine's `on_*` methods for inbound traffic and implements these
//! traits for outbound traffic.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use tilesync_store::{TileId, TileRecord, TileStamp};

/// Opaque peer identifier assigned by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound messages from the authority to its peers.
pub trait PeerTransport: Send + Sync {
    /// Deliver one tile to one peer.
    fn send(&self, peer: &PeerId, tile: &TileRecord) -> Result<()>;

    /// Tell a peer every tile the authority holds for one layer of a world,
    /// so the peer can diff against its own copy and request what it lacks.
    fn broadcast_available(
        &self,
        peer: &PeerId,
        world: &str,
        layer: &str,
        tiles: &[TileStamp],
    ) -> Result<()>;
}

/// Outbound messages from a peer to the authority.
pub trait AuthorityLink: Send + Sync {
    /// Register interest in `world`, the world the peer is currently in.
    fn subscribe(&self, world: &str) -> Result<()>;

    /// Upload a locally changed tile.
    fn send_tile(&self, tile: &TileRecord) -> Result<()>;

    /// Ask for specific tiles of one layer.
    fn request_tiles(&self, world: &str, layer: &str, ids: &[TileId]) -> Result<()>;
}
