//! Tile storage on the local filesystem.

use crate::error::{Error, Result};
use crate::layout::{check_component, parse_tile_file_name, parse_tile_path};
use crate::tile::{system_time_to_millis, TileId, TileRecord, TileStamp};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Disambiguates temporary files written concurrently by one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Key-value view over `<root>/<world>/<layer>/<x>,<y>.png`.
///
/// The root is canonicalized when the store is opened so every path the store
/// hands out is absolute and comparable with paths reported by filesystem
/// notifications.
#[derive(Debug, Clone)]
pub struct TileStore {
    root: PathBuf,
}

impl TileStore {
    /// Open or create a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;
        let root = root.canonicalize().map_err(|e| Error::io(root, e))?;
        debug!("Opened tile store at {:?}", root);
        Ok(Self { root })
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every layer of `world`.
    pub fn world_dir(&self, world: &str) -> Result<PathBuf> {
        check_component(world)?;
        Ok(self.root.join(world))
    }

    /// Directory holding the tiles of one layer.
    pub fn layer_dir(&self, world: &str, layer: &str) -> Result<PathBuf> {
        check_component(layer)?;
        Ok(self.world_dir(world)?.join(layer))
    }

    /// Absolute path of a tile's file.
    pub fn path_for(&self, id: &TileId) -> Result<PathBuf> {
        Ok(self.layer_dir(&id.world, &id.layer)?.join(id.file_name()))
    }

    /// Read a tile's bytes and timestamp, or `None` if it is not stored.
    pub fn get(&self, id: &TileId) -> Result<Option<TileRecord>> {
        let path = self.path_for(id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(&path, e)),
        };
        let modified_at = match modified_millis(&path) {
            Ok(ts) => ts,
            // Deleted between the read and the stat.
            Err(Error::Io { source, .. }) if source.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(TileRecord::new(id.clone(), bytes, modified_at)))
    }

    /// Timestamp of a stored tile without reading its bytes.
    pub fn timestamp(&self, id: &TileId) -> Result<Option<u64>> {
        let path = self.path_for(id)?;
        match modified_millis(&path) {
            Ok(ts) => Ok(Some(ts)),
            Err(Error::Io { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether a tile is stored.
    pub fn exists(&self, id: &TileId) -> Result<bool> {
        Ok(self.path_for(id)?.is_file())
    }

    /// Create or replace a tile.
    ///
    /// The bytes are written to a temporary sibling, stamped with `timestamp`
    /// and renamed over the target, so the replacement is atomic. Parent
    /// directories are created as needed.
    pub fn put(&self, id: &TileId, bytes: &[u8], timestamp: u64) -> Result<()> {
        let path = self.path_for(id)?;
        let dir = path
            .parent()
            .ok_or_else(|| Error::InvalidTilePath(path.clone()))?;
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let temp = dir.join(format!(
            ".{}.tmp-{}-{}",
            id.file_name(),
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let written = write_stamped(&temp, bytes, timestamp)
            .and_then(|()| fs::rename(&temp, &path).map_err(|e| Error::io(&path, e)));
        if written.is_err() {
            let _ = fs::remove_file(&temp);
        }
        written?;

        trace!("Wrote {} ({} bytes, ts={})", id, bytes.len(), timestamp);
        Ok(())
    }

    /// Every tile of one layer with its timestamp (non-recursive).
    ///
    /// A missing layer directory yields an empty list.
    pub fn list_layer(&self, world: &str, layer: &str) -> Result<Vec<TileStamp>> {
        let dir = self.layer_dir(world, layer)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&dir, e)),
        };

        let mut tiles = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let name = entry.file_name();
            let Some((x, y)) = name.to_str().and_then(parse_tile_file_name) else {
                continue;
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match modified_millis(&path) {
                Ok(timestamp) => tiles.push(TileStamp {
                    id: TileId::new(world, layer, x, y),
                    timestamp,
                }),
                Err(e) => warn!("Skipping {:?}: {}", path, e),
            }
        }
        Ok(tiles)
    }

    /// Full recursive scan of one world.
    ///
    /// The sequence is lazy and finite; calling again starts a fresh scan.
    /// Unreadable entries and malformed names are logged and skipped.
    pub fn list_all(&self, world: &str) -> Result<impl Iterator<Item = TileStamp>> {
        let dir = self.world_dir(world)?;
        let world = world.to_string();

        Ok(WalkDir::new(dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Error while listing tiles: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(move |entry| {
                let path = entry.path();
                let id = match parse_tile_path(path) {
                    Ok(id) if id.world == world => id,
                    Ok(_) => return None,
                    Err(_) => {
                        trace!("Ignoring non-tile file {:?}", path);
                        return None;
                    }
                };
                let timestamp = match entry.metadata() {
                    Ok(meta) => meta.modified().map(system_time_to_millis).unwrap_or(0),
                    Err(e) => {
                        warn!("Skipping {:?}: {}", path, e);
                        return None;
                    }
                };
                Some(TileStamp { id, timestamp })
            }))
    }
}

fn write_stamped(path: &Path, bytes: &[u8], timestamp: u64) -> Result<()> {
    let mut file = File::create(path).map_err(|e| Error::io(path, e))?;
    file.write_all(bytes).map_err(|e| Error::io(path, e))?;
    file.set_modified(millis_to_system_time(timestamp))
        .map_err(|e| Error::io(path, e))?;
    file.sync_all().map_err(|e| Error::io(path, e))?;
    Ok(())
}

fn modified_millis(path: &Path) -> Result<u64> {
    let meta = fs::metadata(path).map_err(|e| Error::io(path, e))?;
    let modified = meta.modified().map_err(|e| Error::io(path, e))?;
    Ok(system_time_to_millis(modified))
}

fn millis_to_system_time(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}
