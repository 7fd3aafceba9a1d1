//! Tilesync Store - on-disk tile storage
//!
//! Every participant keeps its tiles as plain PNG files under a root directory:
//!
//! ```text
//! <root>/<world>/<layer>/<x>,<y>.png
//! ```
//!
//! A tile is named by a [`TileId`] (world, layer type, grid coordinate) and its
//! timestamp is the file's modification time in Unix milliseconds. The
//! [`TileStore`] is the only writer of tile bytes: every `put` goes through a
//! sibling temporary file and an atomic rename, so readers never observe a
//! half-written tile.
//!
//! # Example
//!
//! ```no_run
//! use tilesync_store::{TileId, TileStore};
//!
//! # fn main() -> tilesync_store::Result<()> {
//! let store = TileStore::open("./tiles")?;
//! let id = TileId::new("overworld", "day", 3, -2);
//! store.put(&id, b"\x89PNG...", 1_700_000_000_000)?;
//! assert!(store.exists(&id)?);
//! # Ok(())
//! # }
//! ```

mod error;
pub mod layout;
mod store;
mod tile;

pub use error::{Error, Result};
pub use layout::{check_component, is_tile_file_name, parse_tile_file_name, parse_tile_path};
pub use store::TileStore;
pub use tile::{now_millis, TileId, TileRecord, TileStamp};
