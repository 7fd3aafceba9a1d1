//! Change detection over the tile tree.
//!
//! Continuous mode runs one notify watcher per detector, recursive over each
//! watched world directory, and a background thread that turns raw events
//! into deduplicated [`TileId`]s. Scan mode walks the tree once to seed a
//! timestamp index.

use crate::error::{Error, Result};
use crate::processed::ProcessedPaths;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tilesync_store::{is_tile_file_name, parse_tile_path, TileId, TileStamp, TileStore};
use tracing::{debug, info, trace, warn};

/// How often an idle detector thread checks for shutdown.
const IDLE_POLL: Duration = Duration::from_millis(200);

type RawEvents = Receiver<notify::Result<Event>>;

/// Continuous change detector.
///
/// Dropping the detector stops the watch and joins its thread.
pub struct ChangeDetector {
    watcher: Option<RecommendedWatcher>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    roots: Vec<PathBuf>,
}

impl ChangeDetector {
    /// Watch every root recursively and call `on_change` for each changed
    /// tile not written by the engine itself.
    ///
    /// Fails with [`Error::WatchInit`] if any root is missing or cannot be
    /// watched; no thread is left running in that case.
    pub fn spawn<F>(
        roots: &[PathBuf],
        processed: Arc<ProcessedPaths>,
        debounce: Duration,
        on_change: F,
    ) -> Result<Self>
    where
        F: FnMut(TileId) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx).map_err(|source| Error::WatchInit {
            root: roots.first().cloned().unwrap_or_default(),
            source,
        })?;

        let mut canonical = Vec::with_capacity(roots.len());
        for root in roots {
            let root = root.canonicalize().map_err(|_| Error::WatchInit {
                root: root.clone(),
                source: notify::Error::path_not_found().add_path(root.clone()),
            })?;
            watcher
                .watch(&root, RecursiveMode::Recursive)
                .map_err(|source| Error::WatchInit {
                    root: root.clone(),
                    source,
                })?;
            debug!("Watching {:?}", root);
            canonical.push(root);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("tilesync-watch".into())
            .spawn(move || run(rx, processed, debounce, thread_stop, on_change))
            .map_err(|e| Error::WatchInit {
                root: canonical.first().cloned().unwrap_or_default(),
                source: notify::Error::io(e),
            })?;

        info!("Change detection started on {} root(s)", canonical.len());
        Ok(Self {
            watcher: Some(watcher),
            stop,
            thread: Some(thread),
            roots: canonical,
        })
    }

    /// Stop watching and wait for the background thread to exit.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.watcher.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Change detector thread panicked");
            }
            debug!("Change detection stopped");
        }
    }
}

impl Drop for ChangeDetector {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("roots", &self.roots)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

fn run<F>(
    rx: RawEvents,
    processed: Arc<ProcessedPaths>,
    debounce: Duration,
    stop: Arc<AtomicBool>,
    mut on_change: F,
) where
    F: FnMut(TileId),
{
    while !stop.load(Ordering::Acquire) {
        let first = match rx.recv_timeout(IDLE_POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut batch = BTreeSet::new();
        collect(first, &mut batch);

        let deadline = Instant::now() + debounce;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok(event) => collect(event, &mut batch),
                Err(_) => break,
            }
        }

        emit(&batch, &processed, &mut on_change);
        processed.finish_cycle();
    }
}

fn collect(event: notify::Result<Event>, batch: &mut BTreeSet<PathBuf>) {
    let event = match event {
        Ok(event) => event,
        Err(e) => {
            warn!("Watch error: {}", e);
            return;
        }
    };
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }
    for path in event.paths {
        let is_tile = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(is_tile_file_name);
        if is_tile {
            batch.insert(normalize(&path));
        }
    }
}

fn emit<F>(batch: &BTreeSet<PathBuf>, processed: &ProcessedPaths, on_change: &mut F)
where
    F: FnMut(TileId),
{
    for path in batch {
        if processed.consume(path) {
            trace!("Ignoring own write {:?}", path);
            continue;
        }
        match parse_tile_path(path) {
            Ok(id) => {
                trace!("Changed: {}", id);
                on_change(id);
            }
            Err(e) => warn!("Skipping {:?}: {}", path, e),
        }
    }
}

/// Canonical form of an event path; falls back to the raw path when the file
/// is already gone.
fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Scan mode: every tile in the given worlds with its timestamp.
///
/// Worlds that fail to list are logged and skipped.
pub fn scan(store: &TileStore, worlds: &[String]) -> Vec<TileStamp> {
    let mut tiles = Vec::new();
    for world in worlds {
        match store.list_all(world) {
            Ok(found) => {
                let before = tiles.len();
                tiles.extend(found);
                debug!("Scanned {} tiles in {}", tiles.len() - before, world);
            }
            Err(e) => warn!("Cannot scan world {}: {}", world, e),
        }
    }
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::TempDir;

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        done()
    }

    #[test]
    fn missing_root_fails_to_start() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("overworld");

        let result = ChangeDetector::spawn(
            &[missing],
            Arc::new(ProcessedPaths::new()),
            Duration::from_millis(10),
            |_| {},
        );
        assert!(matches!(result, Err(Error::WatchInit { .. })));
    }

    #[test]
    fn reports_new_tiles_and_skips_other_files() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        let world = store.world_dir("overworld").unwrap();
        fs::create_dir_all(world.join("day")).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let detector = ChangeDetector::spawn(
            &[world.clone()],
            Arc::new(ProcessedPaths::new()),
            Duration::from_millis(50),
            move |id| sink.lock().push(id),
        )
        .unwrap();

        fs::write(world.join("day").join("notes.txt"), b"x").unwrap();
        fs::write(world.join("day").join("3,-2.png"), b"png").unwrap();

        let expected = TileId::new("overworld", "day", 3, -2);
        assert!(wait_for(|| seen.lock().contains(&expected)));
        assert!(seen.lock().iter().all(|id| *id == expected));
        detector.shutdown();
    }

    #[test]
    fn own_writes_are_not_reported() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        let world = store.world_dir("overworld").unwrap();
        fs::create_dir_all(world.join("day")).unwrap();

        let processed = Arc::new(ProcessedPaths::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let detector = ChangeDetector::spawn(
            &[world],
            Arc::clone(&processed),
            Duration::from_millis(50),
            move |id| sink.lock().push(id),
        )
        .unwrap();

        let own = TileId::new("overworld", "day", 0, 0);
        processed.mark(store.path_for(&own).unwrap());
        store.put(&own, b"engine", 100).unwrap();

        let other = TileId::new("overworld", "day", 1, 0);
        store.put(&other, b"renderer", 100).unwrap();

        assert!(wait_for(|| seen.lock().contains(&other)));
        assert!(!seen.lock().contains(&own));
        detector.shutdown();
    }

    #[test]
    fn scan_lists_every_world() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::open(dir.path()).unwrap();
        store.put(&TileId::new("overworld", "day", 0, 0), b"a", 10).unwrap();
        store.put(&TileId::new("the_end", "night", 1, 1), b"b", 20).unwrap();

        let mut tiles = scan(&store, &["overworld".into(), "the_end".into(), "the_nether".into()]);
        tiles.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].timestamp, 10);
        assert_eq!(tiles[1].id.world, "the_end");
    }
}
