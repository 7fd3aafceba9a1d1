//! Paths the engine itself just wrote.
//!
//! A peer writes tiles it receives from the authority into the same tree the
//! change detector watches. Before such a write the path is marked here; when
//! the detector sees the resulting event it consumes the mark instead of
//! reporting a local edit. Marks that are never matched by an event expire
//! after one further detection cycle.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Set of in-flight self-inflicted writes.
#[derive(Debug, Default)]
pub struct ProcessedPaths {
    /// Path → detection cycle in which it was marked.
    marks: Mutex<HashMap<PathBuf, u64>>,
    cycle: AtomicU64,
}

impl ProcessedPaths {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` as about to be written by the engine.
    pub fn mark(&self, path: impl Into<PathBuf>) {
        let cycle = self.cycle.load(Ordering::Acquire);
        self.marks.lock().insert(path.into(), cycle);
    }

    /// Remove the mark for `path`, returning whether it was present.
    pub fn consume(&self, path: &Path) -> bool {
        self.marks.lock().remove(path).is_some()
    }

    #[cfg(test)]
    fn contains(&self, path: &Path) -> bool {
        self.marks.lock().contains_key(path)
    }

    /// Close one detection cycle and expire marks older than the previous one.
    pub fn finish_cycle(&self) {
        let finished = self.cycle.fetch_add(1, Ordering::AcqRel);
        let mut marks = self.marks.lock();
        let before = marks.len();
        marks.retain(|_, marked| *marked >= finished);
        if marks.len() != before {
            trace!("Expired {} unmatched write marks", before - marks.len());
        }
    }

    /// Number of marks.
    pub fn len(&self) -> usize {
        self.marks.lock().len()
    }

    /// Whether there are no marks.
    pub fn is_empty(&self) -> bool {
        self.marks.lock().is_empty()
    }

    /// Forget every mark.
    pub fn clear(&self) {
        self.marks.lock().clear();
    }
}
