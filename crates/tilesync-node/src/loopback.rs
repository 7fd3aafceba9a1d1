//! In-process transport between the authority and the local peer.
//!
//! Both directions are unbounded tokio channels; the node's event loop owns
//! the receiving ends and calls into the engines.

use parking_lot::RwLock;
use std::collections::HashMap;
use tilesync_engine::{
    AuthorityLink, Error, PeerId, PeerTransport, Result, TileId, TileRecord, TileStamp,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Messages travelling from a peer to the authority.
#[derive(Debug)]
pub enum ToAuthority {
    Subscribe { peer: PeerId, world: String },
    Tile { peer: PeerId, tile: TileRecord },
    Request { peer: PeerId, world: String, ids: Vec<TileId> },
}

/// Messages travelling from the authority to one peer.
#[derive(Debug)]
pub enum ToPeer {
    Tile(TileRecord),
    Available {
        world: String,
        layer: String,
        tiles: Vec<TileStamp>,
    },
}

/// Authority side: routes messages to attached peers.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    peers: RwLock<HashMap<PeerId, UnboundedSender<ToPeer>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `peer` and return the receiving end of its channel.
    pub fn attach(&self, peer: &PeerId) -> UnboundedReceiver<ToPeer> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().insert(peer.clone(), tx);
        rx
    }

    /// Detach `peer`; later sends to it fail.
    pub fn detach(&self, peer: &PeerId) {
        self.peers.write().remove(peer);
    }

    fn deliver(&self, peer: &PeerId, msg: ToPeer) -> Result<()> {
        let peers = self.peers.read();
        let tx = peers
            .get(peer)
            .ok_or_else(|| Error::Transport(format!("{} is not attached", peer)))?;
        tx.send(msg)
            .map_err(|_| Error::Transport(format!("{} hung up", peer)))
    }
}

impl PeerTransport for LoopbackTransport {
    fn send(&self, peer: &PeerId, tile: &TileRecord) -> Result<()> {
        self.deliver(peer, ToPeer::Tile(tile.clone()))
    }

    fn broadcast_available(
        &self,
        peer: &PeerId,
        world: &str,
        layer: &str,
        tiles: &[TileStamp],
    ) -> Result<()> {
        self.deliver(
            peer,
            ToPeer::Available {
                world: world.to_string(),
                layer: layer.to_string(),
                tiles: tiles.to_vec(),
            },
        )
    }
}

/// Peer side: tags every message with the peer's id.
#[derive(Debug, Clone)]
pub struct LoopbackLink {
    peer: PeerId,
    tx: UnboundedSender<ToAuthority>,
}

impl LoopbackLink {
    pub fn new(peer: PeerId, tx: UnboundedSender<ToAuthority>) -> Self {
        Self { peer, tx }
    }

    fn deliver(&self, msg: ToAuthority) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| Error::Transport("authority hung up".into()))
    }
}

impl AuthorityLink for LoopbackLink {
    fn subscribe(&self, world: &str) -> Result<()> {
        self.deliver(ToAuthority::Subscribe {
            peer: self.peer.clone(),
            world: world.to_string(),
        })
    }

    fn send_tile(&self, tile: &TileRecord) -> Result<()> {
        self.deliver(ToAuthority::Tile {
            peer: self.peer.clone(),
            tile: tile.clone(),
        })
    }

    fn request_tiles(&self, world: &str, _layer: &str, ids: &[TileId]) -> Result<()> {
        self.deliver(ToAuthority::Request {
            peer: self.peer.clone(),
            world: world.to_string(),
            ids: ids.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_to_attached_peers_only() {
        let transport = LoopbackTransport::new();
        let alice = PeerId::from("alice");
        let mut rx = transport.attach(&alice);
        let tile = TileRecord::new(TileId::new("overworld", "day", 0, 0), vec![1], 5);

        transport.send(&alice, &tile).unwrap();
        assert!(matches!(rx.try_recv(), Ok(ToPeer::Tile(t)) if t == tile));
        assert!(transport.send(&PeerId::from("bob"), &tile).is_err());

        transport.detach(&alice);
        assert!(transport.send(&alice, &tile).is_err());
    }

    #[test]
    fn link_tags_messages_with_the_peer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = LoopbackLink::new(PeerId::from("alice"), tx);

        link.subscribe("overworld").unwrap();
        match rx.try_recv() {
            Ok(ToAuthority::Subscribe { peer, world }) => {
                assert_eq!(peer, PeerId::from("alice"));
                assert_eq!(world, "overworld");
            }
            other => panic!("unexpected {:?}", other),
        }

        drop(rx);
        assert!(link.request_tiles("overworld", "day", &[]).is_err());
    }
}
