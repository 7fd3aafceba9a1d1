//! Engine configuration.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Worlds watched when none are configured.
pub const DEFAULT_WORLDS: [&str; 3] = ["overworld", "the_nether", "the_end"];

/// Configuration shared by the authority and peer engines.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory of the tile store.
    pub root: PathBuf,

    /// Worlds to scan and watch.
    pub worlds: Vec<String>,

    /// Interval between scheduling ticks (one tile per tick).
    pub tick_interval: Duration,

    /// How long the change detector keeps collecting events into one batch.
    pub watch_debounce: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./tilesync-data"),
            worlds: DEFAULT_WORLDS.iter().map(|w| w.to_string()).collect(),
            tick_interval: Duration::from_millis(50),
            watch_debounce: Duration::from_millis(100),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables with sensible defaults.
    ///
    /// - `TILESYNC_ROOT`: store root (default `./tilesync-data`)
    /// - `TILESYNC_WORLDS`: comma-separated world keys
    /// - `TILESYNC_TICK_MS`: tick interval in milliseconds (default 50)
    /// - `TILESYNC_DEBOUNCE_MS`: watch batch window in milliseconds (default 100)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("TILESYNC_ROOT") {
            config.root = PathBuf::from(root);
        }

        if let Ok(worlds) = std::env::var("TILESYNC_WORLDS") {
            config.worlds = parse_worlds(&worlds)?;
        }

        if let Ok(ms) = std::env::var("TILESYNC_TICK_MS") {
            config.tick_interval = parse_millis("TILESYNC_TICK_MS", &ms)?;
        }

        if let Ok(ms) = std::env::var("TILESYNC_DEBOUNCE_MS") {
            config.watch_debounce = parse_millis("TILESYNC_DEBOUNCE_MS", &ms)?;
        }

        Ok(config)
    }

    /// Set the watched worlds.
    #[must_use]
    pub fn with_worlds<I, S>(mut self, worlds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worlds = worlds.into_iter().map(Into::into).collect();
        self
    }

    /// Set the watch batch window.
    #[must_use]
    pub fn with_watch_debounce(mut self, debounce: Duration) -> Self {
        self.watch_debounce = debounce;
        self
    }
}

fn parse_worlds(value: &str) -> Result<Vec<String>> {
    let worlds: Vec<String> = value
        .split(',')
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect();
    if worlds.is_empty() {
        return Err(Error::Config("TILESYNC_WORLDS lists no worlds".into()));
    }
    for world in &worlds {
        tilesync_store::layout::check_component(world)
            .map_err(|_| Error::Config(format!("invalid world name {world:?}")))?;
    }
    Ok(worlds)
}

fn parse_millis(name: &str, value: &str) -> Result<Duration> {
    let ms: u64 = value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid {name}: {value:?}")))?;
    if ms == 0 {
        return Err(Error::Config(format!("{name} must be positive")));
    }
    Ok(Duration::from_millis(ms))
}
