//! Authority and peers wired together through in-memory links, with real
//! change detection on every peer.

mod common;

use common::{decode, png, tile, wait_for, FakeLink, FakeTransport, ToAuthority, ToPeer};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tilesync_engine::{
    Authority, EngineConfig, MemoryLedger, PeerEngine, PeerId, SchedulerState, TileStore,
};

fn config() -> EngineConfig {
    EngineConfig::default()
        .with_worlds(["overworld"])
        .with_watch_debounce(Duration::from_millis(20))
}

struct Peer {
    id: PeerId,
    dir: TempDir,
    link: Arc<FakeLink>,
    engine: PeerEngine,
}

impl Peer {
    fn new(name: &str, seed: impl FnOnce(&TileStore)) -> Self {
        let dir = TempDir::new().unwrap();
        seed(&TileStore::open(dir.path()).unwrap());
        let link = Arc::new(FakeLink::default());
        let engine = PeerEngine::new(config(), link.clone());
        engine.init(dir.path()).unwrap();
        Self {
            id: PeerId::from(name),
            dir,
            link,
            engine,
        }
    }

    fn store(&self) -> TileStore {
        TileStore::open(self.dir.path()).unwrap()
    }
}

struct Network {
    _dir: TempDir,
    transport: Arc<FakeTransport>,
    authority: Authority,
    peers: Vec<Peer>,
}

impl Network {
    fn new(peers: Vec<Peer>) -> Self {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport::default());
        let authority = Authority::new(config(), transport.clone(), Arc::new(MemoryLedger::new()));
        authority.init(dir.path()).unwrap();
        Self {
            _dir: dir,
            transport,
            authority,
            peers,
        }
    }

    /// Deliver every buffered message in both directions. Returns whether
    /// anything moved.
    fn pump(&self) -> bool {
        let mut moved = false;
        loop {
            let mut progressed = false;
            for peer in &self.peers {
                while let Some(msg) = peer.link.next() {
                    progressed = true;
                    match msg {
                        ToAuthority::Subscribe(world) => {
                            self.authority.on_subscribe_request(&peer.id, &world);
                        }
                        ToAuthority::Tile(tile) => {
                            self.authority
                                .on_tile_received(&peer.id, tile.id, tile.bytes, tile.modified_at);
                        }
                        ToAuthority::Request { world, ids } => {
                            self.authority.on_catchup_request(&peer.id, &world, &ids);
                        }
                    }
                }
            }
            while let Some((to, msg)) = self.transport.next() {
                progressed = true;
                let Some(peer) = self.peers.iter().find(|p| p.id == to) else {
                    continue;
                };
                match msg {
                    ToPeer::Tile(tile) => {
                        peer.engine
                            .on_tile_received(tile.id, tile.bytes, tile.modified_at);
                    }
                    ToPeer::Available {
                        world,
                        layer,
                        tiles,
                    } => {
                        peer.engine.on_available(&world, &layer, &tiles);
                    }
                }
            }
            if !progressed {
                return moved;
            }
            moved = true;
        }
    }

    /// Tick everyone until nothing has moved for a while.
    fn settle(&self) {
        let mut quiet = 0;
        for _ in 0..500 {
            let mut moved = self.authority.on_tick() != tilesync_engine::TickOutcome::Idle;
            for peer in &self.peers {
                moved |= peer.engine.on_tick().is_some();
            }
            moved |= self.pump();

            let idle = self.authority.scheduler_state() == SchedulerState::Idle
                && self.peers.iter().all(|p| p.engine.pending_uploads() == 0);
            quiet = if moved || !idle { 0 } else { quiet + 1 };
            if quiet >= 15 {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("network did not settle");
    }
}

const RED: [u8; 3] = [255, 0, 0];
const BLUE: [u8; 3] = [0, 0, 255];

#[test]
fn peers_converge_on_merged_tiles() {
    let shared = tile("overworld", 3, -2);
    let only_bob = tile("overworld", 0, 1);

    let alice = Peer::new("alice", |store| {
        store.put(&shared, &png(&[(0, 0, RED)]), 1_000).unwrap();
    });
    let bob = Peer::new("bob", |store| {
        store.put(&shared, &png(&[(3, 3, BLUE)]), 2_000).unwrap();
        store.put(&only_bob, &png(&[(1, 1, BLUE)]), 2_000).unwrap();
    });
    let net = Network::new(vec![alice, bob]);

    for peer in &net.peers {
        peer.engine.subscribe("overworld").unwrap();
    }
    net.settle();

    let canonical = net.authority.tile(&shared).unwrap().unwrap();
    let image = decode(&canonical.bytes);
    assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0, 255]);
    assert_eq!(image.get_pixel(3, 3).0, [0, 0, 255, 255]);

    for peer in &net.peers {
        let local = peer.store().get(&shared).unwrap().unwrap();
        assert_eq!(local.bytes, canonical.bytes, "{} diverged", peer.id);
        assert!(peer.store().exists(&only_bob).unwrap());
    }

    let stats = net.authority.stats();
    assert_eq!(stats.subscribed_peers, 2);
    assert_eq!(stats.decode_failures, 0);
    assert_eq!(stats.pending_deliveries, 0);
}

#[test]
fn received_tiles_are_not_uploaded_again() {
    let peer = Peer::new("alice", |_| {});
    peer.engine.subscribe("overworld").unwrap();
    assert!(matches!(peer.link.next(), Some(ToAuthority::Subscribe(_))));

    let received = tile("overworld", 0, 0);
    assert!(peer
        .engine
        .on_tile_received(received.clone(), png(&[(0, 0, RED)]), 5_000));

    let rendered = tile("overworld", 1, 0);
    peer.store().put(&rendered, &png(&[(1, 1, BLUE)]), 6_000).unwrap();

    assert!(wait_for(|| peer.engine.queued_uploads().contains(&rendered)));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(peer.engine.queued_uploads(), vec![rendered]);
    peer.engine.shutdown();
}

#[test]
fn peer_restart_does_not_replay_old_uploads() {
    let peer = Peer::new("alice", |_| {});
    peer.engine.subscribe("overworld").unwrap();

    let rendered = tile("overworld", 2, 2);
    peer.store().put(&rendered, &png(&[(2, 2, RED)]), 7_000).unwrap();
    assert!(wait_for(|| peer.engine.pending_uploads() == 1));

    peer.engine.shutdown();
    peer.engine.init(peer.dir.path()).unwrap();
    assert_eq!(peer.engine.pending_uploads(), 0);
    assert!(!peer.engine.is_watching());
}

#[test]
fn edit_after_early_receive_is_uploaded() {
    let peer = Peer::new("alice", |_| {});
    let received = tile("overworld", 3, 3);
    assert!(peer
        .engine
        .on_tile_received(received.clone(), png(&[(0, 0, RED)]), 5_000));

    peer.engine.subscribe("overworld").unwrap();
    assert_eq!(peer.engine.on_tick(), Some(received.clone()));
    assert_eq!(peer.engine.pending_uploads(), 0);

    peer.store().put(&received, &png(&[(2, 2, BLUE)]), 8_000).unwrap();
    assert!(wait_for(|| peer.engine.queued_uploads() == vec![received.clone()]));
    peer.engine.shutdown();
}
