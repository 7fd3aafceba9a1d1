//! Persisted per-peer "last synced" timestamps.
//!
//! The ledger records, for each (peer, world), the newest tile timestamp
//! successfully delivered to that peer. A reconnecting peer is caught up with
//! every tile stamped after it. Unknown pairs read as 0.

use crate::error::{Error, Result};
use crate::transport::PeerId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Storage for last-sync timestamps.
pub trait SyncLedger: Send + Sync {
    /// Newest timestamp delivered to `peer` for `world`, or 0.
    fn last_sync(&self, peer: &PeerId, world: &str) -> Result<u64>;

    /// Record the newest timestamp delivered to `peer` for `world`.
    fn record_sync(&self, peer: &PeerId, world: &str, timestamp: u64) -> Result<()>;
}

/// Ledger kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<(PeerId, String), u64>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncLedger for MemoryLedger {
    fn last_sync(&self, peer: &PeerId, world: &str) -> Result<u64> {
        Ok(self
            .entries
            .lock()
            .get(&(peer.clone(), world.to_string()))
            .copied()
            .unwrap_or(0))
    }

    fn record_sync(&self, peer: &PeerId, world: &str, timestamp: u64) -> Result<()> {
        self.entries
            .lock()
            .insert((peer.clone(), world.to_string()), timestamp);
        Ok(())
    }
}

type LedgerMap = BTreeMap<PeerId, BTreeMap<String, u64>>;

/// Ledger persisted as one JSON document, rewritten on every record.
#[derive(Debug)]
pub struct JsonFileLedger {
    path: PathBuf,
    entries: Mutex<LedgerMap>,
}

impl JsonFileLedger {
    /// Load the ledger at `path`, starting empty if the file does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| Error::Ledger(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerMap::new(),
            Err(e) => return Err(Error::Ledger(format!("{}: {}", path.display(), e))),
        };
        debug!("Loaded sync ledger from {:?}", path);
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &LedgerMap) -> Result<()> {
        let data = serde_json::to_vec_pretty(entries)
            .map_err(|e| Error::Ledger(e.to_string()))?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::Ledger(format!("{}: {}", dir.display(), e)))?;
        }
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, data)
            .and_then(|()| std::fs::rename(&temp, &self.path))
            .map_err(|e| Error::Ledger(format!("{}: {}", self.path.display(), e)))
    }
}

impl SyncLedger for JsonFileLedger {
    fn last_sync(&self, peer: &PeerId, world: &str) -> Result<u64> {
        Ok(self
            .entries
            .lock()
            .get(peer)
            .and_then(|worlds| worlds.get(world))
            .copied()
            .unwrap_or(0))
    }

    fn record_sync(&self, peer: &PeerId, world: &str, timestamp: u64) -> Result<()> {
        let mut entries = self.entries.lock();
        entries
            .entry(peer.clone())
            .or_default()
            .insert(world.to_string(), timestamp);
        self.flush(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_ledger_defaults_to_zero() {
        let ledger = MemoryLedger::new();
        let peer = PeerId::from("alice");

        assert_eq!(ledger.last_sync(&peer, "overworld").unwrap(), 0);
        ledger.record_sync(&peer, "overworld", 42).unwrap();
        assert_eq!(ledger.last_sync(&peer, "overworld").unwrap(), 42);
        assert_eq!(ledger.last_sync(&peer, "the_end").unwrap(), 0);
    }

    #[test]
    fn json_ledger_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state/last_sync.json");
        let peer = PeerId::from("alice");

        {
            let ledger = JsonFileLedger::open(&path).unwrap();
            ledger.record_sync(&peer, "overworld", 1_000).unwrap();
            ledger.record_sync(&peer, "the_nether", 7).unwrap();
        }

        let ledger = JsonFileLedger::open(&path).unwrap();
        assert_eq!(ledger.last_sync(&peer, "overworld").unwrap(), 1_000);
        assert_eq!(ledger.last_sync(&peer, "the_nether").unwrap(), 7);
        assert_eq!(ledger.last_sync(&PeerId::from("bob"), "overworld").unwrap(), 0);
    }

    #[test]
    fn json_ledger_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("last_sync.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(JsonFileLedger::open(&path), Err(Error::Ledger(_))));
    }
}
