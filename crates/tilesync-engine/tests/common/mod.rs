//! Shared fixtures for the engine scenarios.

#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::time::{Duration, Instant};
use tilesync_engine::{AuthorityLink, Error, PeerId, PeerTransport, Result, TileId, TileRecord, TileStamp};

/// A 4x4 PNG with the given opaque pixels; everything else is transparent.
pub fn png(pixels: &[(u32, u32, [u8; 3])]) -> Vec<u8> {
    let mut image = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
    for &(x, y, [r, g, b]) in pixels {
        image.put_pixel(x, y, Rgba([r, g, b, 255]));
    }
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Decode a PNG produced by the engine.
pub fn decode(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes).unwrap().to_rgba8()
}

pub fn tile(world: &str, x: i32, y: i32) -> TileId {
    TileId::new(world, "day", x, y)
}

/// Poll `done` for up to five seconds.
pub fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    done()
}

/// Message the authority sent to a peer.
#[derive(Debug, Clone)]
pub enum ToPeer {
    Tile(TileRecord),
    Available {
        world: String,
        layer: String,
        tiles: Vec<TileStamp>,
    },
}

/// Authority-side transport that records every message per peer.
#[derive(Default)]
pub struct FakeTransport {
    outbox: Mutex<VecDeque<(PeerId, ToPeer)>>,
    log: Mutex<Vec<(PeerId, ToPeer)>>,
    down: Mutex<HashSet<PeerId>>,
}

impl FakeTransport {
    /// Make every send to `peer` fail.
    pub fn cut(&self, peer: &PeerId) {
        self.down.lock().insert(peer.clone());
    }

    /// Ids of every tile sent to `peer`, in send order.
    pub fn tiles_sent_to(&self, peer: &PeerId) -> Vec<TileId> {
        self.log
            .lock()
            .iter()
            .filter_map(|(to, msg)| match msg {
                ToPeer::Tile(tile) if to == peer => Some(tile.id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every availability list sent to `peer`.
    pub fn announcements_to(&self, peer: &PeerId) -> Vec<(String, Vec<TileStamp>)> {
        self.log
            .lock()
            .iter()
            .filter_map(|(to, msg)| match msg {
                ToPeer::Available { layer, tiles, .. } if to == peer => {
                    Some((layer.clone(), tiles.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Take the oldest undelivered message.
    pub fn next(&self) -> Option<(PeerId, ToPeer)> {
        self.outbox.lock().pop_front()
    }

    fn push(&self, peer: &PeerId, msg: ToPeer) -> Result<()> {
        if self.down.lock().contains(peer) {
            return Err(Error::Transport(format!("{} is unreachable", peer)));
        }
        self.log.lock().push((peer.clone(), msg.clone()));
        self.outbox.lock().push_back((peer.clone(), msg));
        Ok(())
    }
}

impl PeerTransport for FakeTransport {
    fn send(&self, peer: &PeerId, tile: &TileRecord) -> Result<()> {
        self.push(peer, ToPeer::Tile(tile.clone()))
    }

    fn broadcast_available(
        &self,
        peer: &PeerId,
        world: &str,
        layer: &str,
        tiles: &[TileStamp],
    ) -> Result<()> {
        self.push(
            peer,
            ToPeer::Available {
                world: world.to_string(),
                layer: layer.to_string(),
                tiles: tiles.to_vec(),
            },
        )
    }
}

/// Message a peer sent to the authority.
#[derive(Debug, Clone)]
pub enum ToAuthority {
    Subscribe(String),
    Tile(TileRecord),
    Request {
        world: String,
        ids: Vec<TileId>,
    },
}

/// Peer-side link that buffers messages for the test to deliver.
#[derive(Default)]
pub struct FakeLink {
    outbox: Mutex<VecDeque<ToAuthority>>,
}

impl FakeLink {
    pub fn next(&self) -> Option<ToAuthority> {
        self.outbox.lock().pop_front()
    }
}

impl AuthorityLink for FakeLink {
    fn subscribe(&self, world: &str) -> Result<()> {
        self.outbox.lock().push_back(ToAuthority::Subscribe(world.to_string()));
        Ok(())
    }

    fn send_tile(&self, tile: &TileRecord) -> Result<()> {
        self.outbox.lock().push_back(ToAuthority::Tile(tile.clone()));
        Ok(())
    }

    fn request_tiles(&self, world: &str, _layer: &str, ids: &[TileId]) -> Result<()> {
        self.outbox.lock().push_back(ToAuthority::Request {
            world: world.to_string(),
            ids: ids.to_vec(),
        });
        Ok(())
    }
}
