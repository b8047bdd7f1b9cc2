//! Ring node: operation dispatch, join protocol, peer accept loop.
//!
//! A [`Node`] owns the peer listener, the local store, and the
//! membership table. Every inbound operation, whether from the HTTP
//! front or from a peer, is routed the same way: hash the key, look up the
//! successor, and either apply it locally or forward it one hop to the
//! owner. Because every node (eventually) holds the full ring in its
//! table, the successor computed locally is the final owner and no
//! multi-hop traversal happens.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::keyspace::KeySpace;
use crate::membership::{Membership, Peer};
use crate::proto::{self, Request, Response};
use crate::store::Store;
use crate::transport::{RetryPolicy, send_request};

pub struct Node {
    keyspace: KeySpace,
    own: Peer,
    membership: Membership,
    store: Store,
    policy: RetryPolicy,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Open the store, seed the membership table with our own descriptor,
    /// bind the peer listener, and start accepting. Does not contact any
    /// seed; see [`Node::join`].
    ///
    /// The descriptor is derived from the port actually bound, so a
    /// configured port of 0 yields a usable ephemeral-port node.
    pub async fn bind(config: &NodeConfig) -> Result<Arc<Self>, NodeError> {
        let listener =
            TcpListener::bind((config.host.as_str(), config.peer_port)).await?;
        let addr = listener.local_addr()?;

        let keyspace = KeySpace::new(config.ring_bits)?;
        let own = Peer {
            id: keyspace.node_id(&config.host, addr.port()),
            ip: config.host.clone(),
            port: addr.port(),
        };
        let store = Store::open(&config.data_dir, addr.port())?;

        let membership = Membership::new();
        membership.add(own.clone());

        let node = Arc::new(Self {
            keyspace,
            own,
            membership,
            store,
            policy: config.retry_policy(),
            accept_task: Mutex::new(None),
        });
        tracing::info!(node = node.own.id, %addr, "Peer listener bound");

        let task = tokio::spawn(Arc::clone(&node).accept_loop(listener));
        *node.accept_task.lock() = Some(task);
        Ok(node)
    }

    pub fn own(&self) -> &Peer {
        &self.own
    }

    pub fn keyspace(&self) -> &KeySpace {
        &self.keyspace
    }

    /// Snapshot of the membership table.
    pub fn peers(&self) -> Arc<Vec<Peer>> {
        self.membership.snapshot()
    }

    /// Stop accepting peer connections and close the store.
    pub async fn shutdown(&self) {
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.store.close();
        tracing::info!(node = self.own.id, "Node shut down");
    }

    // ── Routing ────────────────────────────────────────────────────────

    /// Owner of `key`: the successor of its ring position.
    fn route(&self, key: &str) -> Result<Peer, NodeError> {
        let pos = self.keyspace.hash(key.as_bytes());
        let owner = self
            .membership
            .successor(pos)
            .ok_or_else(|| NodeError::Config("membership table is empty".into()))?;
        tracing::debug!(key, pos, owner = owner.id, "Routed");
        Ok(owner)
    }

    fn is_local(&self, peer: &Peer) -> bool {
        peer.id == self.own.id
    }

    // ── Key operations ─────────────────────────────────────────────────

    /// Store `key` on its owner: locally, or forwarded one hop.
    ///
    /// A forward that comes back empty after retries is logged and still
    /// reported as accepted; the transport has already retried and the
    /// initiator only learns success through its own response path.
    pub async fn store_key(&self, key: &str, value: &str) -> Result<(), NodeError> {
        let owner = self.route(key)?;
        if self.is_local(&owner) {
            tracing::info!(key, node = self.own.id, "Storing key locally");
            return self.store.put(key.as_bytes(), value.as_bytes());
        }
        let request = Request::StoreKey {
            key: key.to_string(),
            value: value.to_string(),
        };
        match send_request(&owner.addr(), &request, &self.policy).await {
            Some(Response::Stored { .. }) => {}
            Some(other) => {
                tracing::warn!(key, owner = %owner.addr(), "Unexpected store_key reply: {other:?}")
            }
            None => tracing::warn!(key, owner = %owner.addr(), "store_key forward unacknowledged"),
        }
        Ok(())
    }

    /// Look `key` up on its owner. `Ok(None)` when the key is absent or
    /// the owner could not be reached.
    pub async fn find_key(&self, key: &str) -> Result<Option<String>, NodeError> {
        let owner = self.route(key)?;
        if self.is_local(&owner) {
            tracing::info!(key, node = self.own.id, "Finding key locally");
            let value = self.store.get(key.as_bytes())?;
            return Ok(value.map(|v| String::from_utf8_lossy(&v).into_owned()));
        }
        let request = Request::FindKey {
            key: key.to_string(),
        };
        match send_request(&owner.addr(), &request, &self.policy).await {
            Some(Response::Success { value, .. }) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Remove `key` from its owner. Idempotent.
    pub async fn delete_key(&self, key: &str) -> Result<(), NodeError> {
        let owner = self.route(key)?;
        if self.is_local(&owner) {
            tracing::info!(key, node = self.own.id, "Deleting key locally");
            return self.store.delete(key.as_bytes());
        }
        let request = Request::DeleteKey {
            key: key.to_string(),
        };
        match send_request(&owner.addr(), &request, &self.policy).await {
            Some(Response::Deleted { .. }) => {}
            Some(other) => {
                tracing::warn!(key, owner = %owner.addr(), "Unexpected delete_key reply: {other:?}")
            }
            None => tracing::warn!(key, owner = %owner.addr(), "delete_key forward unacknowledged"),
        }
        Ok(())
    }

    // ── Membership ─────────────────────────────────────────────────────

    /// Announce ourselves to a running seed and wait for admission. The
    /// seed's broadcast completes before its reply, so our table is the
    /// full ring once this returns.
    pub async fn join(&self, seed: &str) -> Result<(), NodeError> {
        let request = Request::RegisterNode {
            node: self.own.clone(),
        };
        match send_request(seed, &request, &self.policy).await {
            Some(Response::Registered) => {
                tracing::info!(seed, node = self.own.id, "Joined ring");
                Ok(())
            }
            Some(other) => Err(NodeError::Protocol(format!(
                "unexpected join reply: {other:?}"
            ))),
            None => Err(NodeError::ForwardingFailed {
                addr: seed.to_string(),
                attempts: self.policy.attempts,
            }),
        }
    }

    /// Admit a peer and broadcast the full table to everyone but us.
    pub async fn register_peer(&self, peer: Peer) {
        if self.membership.add(peer.clone()) {
            tracing::info!(node = peer.id, addr = %peer.addr(), "Admitted new ring member");
        }
        self.broadcast_table().await;
    }

    /// Replace the whole table from a broadcast, keeping our descriptor.
    pub fn update_peers(&self, nodes: Vec<(u64, String, u16)>) {
        let peers = nodes.into_iter().map(Peer::from).collect();
        self.membership.replace_all(peers, &self.own);
        tracing::debug!(len = self.membership.len(), "Membership table replaced");
    }

    async fn broadcast_table(&self) {
        let snapshot = self.membership.snapshot();
        let nodes: Vec<(u64, String, u16)> = snapshot.iter().map(Into::into).collect();
        for peer in snapshot.iter().filter(|p| p.id != self.own.id) {
            let request = Request::UpdateNodes {
                nodes: nodes.clone(),
            };
            // update_nodes answers with a clean close; nothing to check.
            let _ = send_request(&peer.addr(), &request, &self.policy).await;
        }
    }

    // ── Peer protocol server ───────────────────────────────────────────

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let node = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = node.handle_peer(stream).await {
                            tracing::error!(%peer_addr, "Peer handler error: {e}");
                        }
                    });
                }
                Err(e) => tracing::error!("Peer accept error: {e}"),
            }
        }
    }

    /// One request, at most one reply, close.
    async fn handle_peer(&self, stream: TcpStream) -> Result<(), NodeError> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let frame = match proto::read_frame(&mut reader, self.policy.frame_limit).await {
            Ok(Some(frame)) => frame,
            // Connected and closed without sending anything.
            Ok(None) => return Ok(()),
            Err(e) => {
                let reply = Response::error(e.to_string());
                proto::write_frame(&mut write_half, &reply).await?;
                return Err(e);
            }
        };

        let request: Request = match serde_json::from_slice(&frame) {
            Ok(request) => request,
            Err(e) => {
                let reply = Response::error(format!("invalid request: {e}"));
                proto::write_frame(&mut write_half, &reply).await?;
                return Err(NodeError::Protocol(e.to_string()));
            }
        };

        if let Some(reply) = self.dispatch(request).await {
            proto::write_frame(&mut write_half, &reply).await?;
        }
        write_half.shutdown().await?;
        Ok(())
    }

    /// Apply one peer request. `None` means the exchange has no reply
    /// (`update_nodes`); the caller closes the socket either way.
    async fn dispatch(&self, request: Request) -> Option<Response> {
        match request {
            Request::StoreKey { key, value } => Some(match self.store_key(&key, &value).await {
                Ok(()) => Response::Stored { key },
                Err(e) => Response::error(e.to_string()),
            }),
            Request::FindKey { key } => Some(match self.find_key(&key).await {
                Ok(Some(value)) => Response::Success { key, value },
                Ok(None) => Response::not_found(),
                Err(e) => Response::error(e.to_string()),
            }),
            Request::DeleteKey { key } => Some(match self.delete_key(&key).await {
                Ok(()) => Response::Deleted { key },
                Err(e) => Response::error(e.to_string()),
            }),
            Request::RegisterNode { node } => {
                self.register_peer(node).await;
                Some(Response::Registered)
            }
            Request::UpdateNodes { nodes } => {
                self.update_peers(nodes);
                None
            }
        }
    }
}
