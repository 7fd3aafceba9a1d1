//! Per-tile critical sections.
//!
//! Every reconcile-then-persist sequence for one tile runs under that tile's
//! lock, so two writers to the same coordinate never interleave their decode,
//! merge and write steps. Unrelated tiles never contend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tilesync_store::TileId;

/// Owners prune the table once it holds more entries than this.
pub(crate) const PRUNE_THRESHOLD: usize = 1024;

/// Lock table keyed by [`TileId`].
#[derive(Debug, Default)]
pub struct TileLocks {
    table: Mutex<HashMap<TileId, Arc<Mutex<()>>>>,
}

impl TileLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `id`.
    pub fn with_lock<R>(&self, id: &TileId, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut table = self.table.lock();
            Arc::clone(table.entry(id.clone()).or_default())
        };
        let _guard = lock.lock();
        f()
    }

    /// Number of locks currently in the table.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Drop locks nobody holds or waits on. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let mut table = self.table.lock();
        let before = table.len();
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn serializes_one_tile() {
        let locks = Arc::new(TileLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let id = TileId::new("overworld", "day", 0, 0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (locks, inside, overlap, id) =
                    (Arc::clone(&locks), Arc::clone(&inside), Arc::clone(&overlap), id.clone());
                thread::spawn(move || {
                    for _ in 0..50 {
                        locks.with_lock(&id, || {
                            if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                                overlap.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prune_drops_idle_locks() {
        let locks = TileLocks::new();
        locks.with_lock(&TileId::new("w", "l", 0, 0), || ());
        locks.with_lock(&TileId::new("w", "l", 0, 1), || ());
        assert_eq!(locks.len(), 2);

        assert_eq!(locks.prune(), 2);
        assert!(locks.is_empty());
    }

    #[test]
    fn prune_keeps_held_lock() {
        let locks = TileLocks::new();
        let id = TileId::new("w", "l", 0, 0);
        locks.with_lock(&id, || {
            assert_eq!(locks.prune(), 0);
        });
        assert_eq!(locks.len(), 1);
    }
}
