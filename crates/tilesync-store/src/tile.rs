//! Tile identity and records.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifies one tile: a world, a rendering layer and a grid coordinate.
///
/// Ordering is lexicographic over (world, layer, x, y) so ids can live in
/// ordered collections with a stable iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    /// World key (e.g. `overworld`).
    pub world: String,
    /// Layer type within the world (e.g. `day`, `night`, `topo`).
    pub layer: String,
    /// Grid column.
    pub x: i32,
    /// Grid row.
    pub y: i32,
}

impl TileId {
    /// Create a tile id.
    pub fn new(world: impl Into<String>, layer: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            world: world.into(),
            layer: layer.into(),
            x,
            y,
        }
    }

    /// File name of this tile inside its layer directory.
    pub fn file_name(&self) -> String {
        format!("{},{}.png", self.x, self.y)
    }
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{},{}", self.world, self.layer, self.x, self.y)
    }
}

/// A tile id with the timestamp of the version a participant holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileStamp {
    pub id: TileId,
    /// Unix milliseconds.
    pub timestamp: u64,
}

/// A tile's encoded image bytes and modification time.
///
/// Records are values: handing one to the network boundary clones the bytes,
/// and a participant that changes a tile produces a new record.
#[derive(Clone, PartialEq, Eq)]
pub struct TileRecord {
    pub id: TileId,
    /// Encoded PNG bytes.
    pub bytes: Vec<u8>,
    /// Unix milliseconds.
    pub modified_at: u64,
}

impl TileRecord {
    /// Create a record.
    pub fn new(id: TileId, bytes: Vec<u8>, modified_at: u64) -> Self {
        Self {
            id,
            bytes,
            modified_at,
        }
    }
}

impl std::fmt::Debug for TileRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileRecord")
            .field("id", &self.id)
            .field("bytes", &self.bytes.len())
            .field("modified_at", &self.modified_at)
            .finish()
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> u64 {
    system_time_to_millis(SystemTime::now())
}

pub(crate) fn system_time_to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
