//! Peer descriptors and the in-memory membership table.
//!
//! The table is read on every routing decision and written only when a
//! node registers or a full-table broadcast arrives, so it is kept as a
//! copy-on-write sorted vector: readers clone an `Arc` to the current
//! snapshot, writers build a replacement vector and swap it in.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Immutable descriptor of a ring member.
///
/// `id` is the ring position of the canonical `node_<ip>:<port>` string.
/// On the wire the field is spelled `node_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    #[serde(rename = "node_id")]
    pub id: u64,
    pub ip: String,
    pub port: u16,
}

impl Peer {
    /// The `host:port` address of the peer's TCP listener.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl From<&Peer> for (u64, String, u16) {
    fn from(peer: &Peer) -> Self {
        (peer.id, peer.ip.clone(), peer.port)
    }
}

impl From<(u64, String, u16)> for Peer {
    fn from((id, ip, port): (u64, String, u16)) -> Self {
        Peer { id, ip, port }
    }
}

/// Ordered set of known peers, ascending by node id.
///
/// Invariants: no two entries share an id, and after initialization the
/// local node's own descriptor is always present. The table never shrinks
/// except through [`Membership::replace_all`], which re-inserts the local
/// descriptor if the incoming list omitted it.
#[derive(Debug, Default)]
pub struct Membership {
    peers: RwLock<Arc<Vec<Peer>>>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time view of the table, cheap to take and immune to
    /// concurrent writes.
    pub fn snapshot(&self) -> Arc<Vec<Peer>> {
        self.peers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Insert a peer unless its id is already present. Returns whether
    /// the table changed.
    pub fn add(&self, peer: Peer) -> bool {
        let mut guard = self.peers.write();
        if guard.iter().any(|p| p.id == peer.id) {
            return false;
        }
        let mut next = guard.as_ref().clone();
        let pos = next.partition_point(|p| p.id < peer.id);
        next.insert(pos, peer);
        *guard = Arc::new(next);
        true
    }

    /// Swap the whole table for `peers`, deduplicated and sorted, with
    /// `own` re-inserted if the list omitted it.
    pub fn replace_all(&self, peers: Vec<Peer>, own: &Peer) {
        let mut next: Vec<Peer> = Vec::with_capacity(peers.len() + 1);
        for peer in peers.into_iter().chain(std::iter::once(own.clone())) {
            if !next.iter().any(|p| p.id == peer.id) {
                next.push(peer);
            }
        }
        next.sort_by_key(|p| p.id);
        *self.peers.write() = Arc::new(next);
    }

    /// The peer with the smallest id `>= target`, wrapping to the smallest
    /// id in the table. `None` only when the table is empty.
    pub fn successor(&self, target: u64) -> Option<Peer> {
        let peers = self.snapshot();
        peers
            .iter()
            .find(|p| p.id >= target)
            .or_else(|| peers.first())
            .cloned()
    }
}
