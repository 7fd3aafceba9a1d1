//! Error types for the sync engine.

use std::path::PathBuf;
use thiserror::Error;
use tilesync_store::TileId;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling, watching or delivering tiles.
#[derive(Debug, Error)]
pub enum Error {
    /// Tile storage failed.
    #[error("Store error: {0}")]
    Store(#[from] tilesync_store::Error),

    /// One side of a merge is not a readable image.
    #[error("cannot decode tile {id}: {source}")]
    Decode {
        id: TileId,
        #[source]
        source: image::ImageError,
    },

    /// The merged image could not be encoded.
    #[error("cannot encode tile {id}: {source}")]
    Encode {
        id: TileId,
        #[source]
        source: image::ImageError,
    },

    /// A filesystem watch could not be established.
    #[error("cannot watch {root:?}: {source}")]
    WatchInit {
        root: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Sending to a peer or to the authority failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reading or writing the last-sync ledger failed.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// The engine was used before `init` or after `shutdown`.
    #[error("engine is not initialized")]
    NotInitialized,
}
