//! In-memory timestamp index of the authority's tiles.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tilesync_store::{TileId, TileStamp};

/// `world → (tile → timestamp)`, seeded by a startup scan and updated after
/// every successful merge.
#[derive(Debug, Default)]
pub struct TileIndex {
    worlds: RwLock<HashMap<String, HashMap<TileId, u64>>>,
}

impl TileIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current timestamp of a tile.
    pub fn record(&self, id: TileId, timestamp: u64) {
        self.worlds
            .write()
            .entry(id.world.clone())
            .or_default()
            .insert(id, timestamp);
    }

    /// Record many tiles at once.
    pub fn extend(&self, tiles: impl IntoIterator<Item = TileStamp>) -> usize {
        let mut worlds = self.worlds.write();
        let mut count = 0;
        for TileStamp { id, timestamp } in tiles {
            worlds.entry(id.world.clone()).or_default().insert(id, timestamp);
            count += 1;
        }
        count
    }

    /// Indexed timestamp of a tile.
    pub fn timestamp(&self, id: &TileId) -> Option<u64> {
        self.worlds.read().get(&id.world)?.get(id).copied()
    }

    /// Tiles of `world` stamped strictly after `since`, oldest first.
    pub fn newer_than(&self, world: &str, since: u64) -> Vec<TileStamp> {
        let mut tiles: Vec<TileStamp> = self
            .worlds
            .read()
            .get(world)
            .map(|tiles| {
                tiles
                    .iter()
                    .filter(|(_, ts)| **ts > since)
                    .map(|(id, ts)| TileStamp {
                        id: id.clone(),
                        timestamp: *ts,
                    })
                    .collect()
            })
            .unwrap_or_default();
        tiles.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        tiles
    }

    /// Every tile of `world`, grouped by layer.
    pub fn by_layer(&self, world: &str) -> BTreeMap<String, Vec<TileStamp>> {
        let mut layers: BTreeMap<String, Vec<TileStamp>> = BTreeMap::new();
        if let Some(tiles) = self.worlds.read().get(world) {
            for (id, ts) in tiles {
                layers.entry(id.layer.clone()).or_default().push(TileStamp {
                    id: id.clone(),
                    timestamp: *ts,
                });
            }
        }
        for tiles in layers.values_mut() {
            tiles.sort_by(|a, b| a.id.cmp(&b.id));
        }
        layers
    }

    /// Number of indexed tiles across all worlds.
    pub fn len(&self) -> usize {
        self.worlds.read().values().map(HashMap::len).sum()
    }

    /// Whether nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
