//! Tilesync node binary
//!
//! Runs an authority over `TILESYNC_ROOT` and one local peer over
//! `TILESYNC_PEER_ROOT`, connected by an in-process link and driven by one
//! tick interval. Tiles dropped into the peer's tree by a renderer are merged
//! into the authority's store and served back.

mod config;
mod loopback;

use config::NodeConfig;
use loopback::{LoopbackLink, LoopbackTransport, ToAuthority, ToPeer};
use std::sync::Arc;
use tilesync_engine::{Authority, JsonFileLedger, PeerEngine, TickOutcome};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tilesync_node=info,tilesync_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting tilesync node");

    let config = NodeConfig::from_env()?;
    tracing::info!("  Authority: {:?}", config.engine.root);
    tracing::info!("  Peer: {:?} ({} in {})", config.peer_root, config.peer_id, config.peer_world);
    tracing::info!("  Ledger: {:?}", config.ledger);
    tracing::info!("  Tick: {:?}", config.engine.tick_interval);

    let transport = Arc::new(LoopbackTransport::new());
    let ledger = Arc::new(JsonFileLedger::open(&config.ledger)?);
    let authority = Authority::new(config.engine.clone(), transport.clone(), ledger);
    authority.init(&config.engine.root)?;

    let (to_authority, mut authority_rx) = mpsc::unbounded_channel();
    let mut peer_rx = transport.attach(&config.peer_id);
    let link = Arc::new(LoopbackLink::new(config.peer_id.clone(), to_authority));
    let peer = PeerEngine::new(config.engine.clone(), link);
    peer.init(&config.peer_root)?;
    if let Err(e) = peer.subscribe(&config.peer_world) {
        tracing::error!("Local edits will not be uploaded: {}", e);
    }

    let mut interval = tokio::time::interval(config.engine.tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let TickOutcome::Dispatched { id, delivered, .. } = authority.on_tick() {
                    tracing::debug!("Delivered {} to {} peer(s)", id, delivered.len());
                }
                peer.on_tick();

                ticks += 1;
                if ticks % config.stats_every == 0 {
                    match serde_json::to_string(&authority.stats()) {
                        Ok(stats) => tracing::info!("Stats: {}", stats),
                        Err(e) => tracing::warn!("Cannot render stats: {}", e),
                    }
                }
            }
            Some(msg) = authority_rx.recv() => {
                match msg {
                    ToAuthority::Subscribe { peer, world } => {
                        authority.on_subscribe_request(&peer, &world);
                    }
                    ToAuthority::Tile { peer, tile } => {
                        authority.on_tile_received(&peer, tile.id, tile.bytes, tile.modified_at);
                    }
                    ToAuthority::Request { peer, world, ids } => {
                        authority.on_catchup_request(&peer, &world, &ids);
                    }
                }
            }
            Some(msg) = peer_rx.recv() => {
                match msg {
                    ToPeer::Tile(tile) => {
                        peer.on_tile_received(tile.id, tile.bytes, tile.modified_at);
                    }
                    ToPeer::Available { world, layer, tiles } => {
                        peer.on_available(&world, &layer, &tiles);
                    }
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::error!("Cannot listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    tracing::info!("Shutting down");
    authority.on_peer_disconnect(&config.peer_id);
    transport.detach(&config.peer_id);
    peer.shutdown();
    authority.shutdown();
    Ok(())
}
