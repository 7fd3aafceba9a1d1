//! Error types for the tile store.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for tile store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing tiles.
#[derive(Debug, Error)]
pub enum Error {
    /// Disk read or write failure.
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A path that does not follow the `<world>/<layer>/<x>,<y>.png` layout.
    #[error("not a tile path: {0:?}")]
    InvalidTilePath(PathBuf),

    /// A world or layer name that cannot be used as a directory name.
    #[error("invalid path component: {0:?}")]
    InvalidComponent(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
