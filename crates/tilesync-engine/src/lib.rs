//! Tilesync Engine - tile reconciliation and delivery
//!
//! Keeps many participants' copies of a tiled map converged. Every
//! participant renders tiles into a local [`TileStore`]; an [`Authority`]
//! merges what peers upload and hands the merged tiles back out, one tile per
//! tick.
//!
//! # Architecture
//!
//! - **Reconcile**: destination-over merge of two versions of one tile
//! - **Watcher**: filesystem change detection and startup scans
//! - **Registry / Queue**: who is subscribed to which world, what each peer
//!   still has to receive
//! - **Scheduler**: rate-limited fan-out, one tile per tick system-wide
//! - **Authority / Peer**: engine objects with an explicit `init` / `shutdown`
//!   lifecycle, driven by a host through their `on_*` entry points
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tilesync_engine::{Authority, EngineConfig, MemoryLedger, PeerId, PeerTransport, TileRecord, TileStamp};
//!
//! struct Log;
//!
//! impl PeerTransport for Log {
//!     fn send(&self, peer: &PeerId, tile: &TileRecord) -> tilesync_engine::Result<()> {
//!         println!("{} <- {}", peer, tile.id);
//!         Ok(())
//!     }
//!
//!     fn broadcast_available(&self, _: &PeerId, _: &str, _: &str, _: &[TileStamp]) -> tilesync_engine::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> tilesync_engine::Result<()> {
//! let config = EngineConfig::from_env()?;
//! let authority = Authority::new(config.clone(), Arc::new(Log), Arc::new(MemoryLedger::new()));
//! authority.init(&config.root)?;
//! authority.on_subscribe_request(&PeerId::from("alice"), "overworld");
//! authority.on_tick();
//! authority.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod authority;
pub mod config;
pub mod error;
pub mod index;
pub mod ledger;
pub mod locks;
pub mod peer;
pub mod processed;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod transport;
pub mod watcher;

pub use authority::{Authority, AuthorityStats};
pub use config::{EngineConfig, DEFAULT_WORLDS};
pub use error::{Error, Result};
pub use index::TileIndex;
pub use ledger::{JsonFileLedger, MemoryLedger, SyncLedger};
pub use locks::TileLocks;
pub use peer::{LayerDiff, PeerEngine};
pub use processed::ProcessedPaths;
pub use queue::{DeliveryQueue, DeliveryQueues};
pub use reconcile::{reconcile, Merge, Reconciliation};
pub use registry::{PeerSubscription, SubscriptionRegistry};
pub use scheduler::{DeliveryScheduler, SchedulerState, TickOutcome};
pub use transport::{AuthorityLink, PeerId, PeerTransport};
pub use watcher::{scan, ChangeDetector};

pub use tilesync_store::{TileId, TileRecord, TileStamp, TileStore};
