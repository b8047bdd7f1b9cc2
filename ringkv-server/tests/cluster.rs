//! Live-node tests: single-node operation, the join protocol, cross-node
//! routing, persistence, and the peer wire protocol.
//!
//! Nodes bind ephemeral ports, so descriptors and key ownership are
//! computed at runtime rather than hard-coded.

use std::net::SocketAddr;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use ringkv_server::config::NodeConfig;
use ringkv_server::error::NodeError;
use ringkv_server::membership::Peer;
use ringkv_server::node::Node;
use ringkv_server::proto;
use ringkv_server::web;

fn test_config(dir: &TempDir) -> NodeConfig {
    NodeConfig {
        seed: None,
        peer_port: 0,
        http_port: 0,
        host: "127.0.0.1".to_string(),
        data_dir: dir.path().to_path_buf(),
        // Wide enough that two ephemeral-port nodes never collide.
        ring_bits: 32,
        recv_limit: 65536,
        retries: 1,
        timeout_secs: 2,
    }
}

async fn start_node(dir: &TempDir) -> Arc<Node> {
    Node::bind(&test_config(dir)).await.unwrap()
}

/// Serve the HTTP front for a node on an ephemeral port.
async fn start_http(node: Arc<Node>) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, web::router(node)).await.unwrap();
    });
    addr
}

/// Owner id of `pos` under the successor rule, over a sorted peer list.
fn owner_of(pos: u64, peers: &[Peer]) -> u64 {
    peers
        .iter()
        .find(|p| p.id >= pos)
        .or_else(|| peers.first())
        .unwrap()
        .id
}

/// Split a converged pair into (non-owner, owner) for `key`.
fn orient<'a>(
    key: &str,
    a: &'a Arc<Node>,
    b: &'a Arc<Node>,
) -> (&'a Arc<Node>, &'a Arc<Node>) {
    let peers = a.peers();
    let owner = owner_of(a.keyspace().hash(key.as_bytes()), &peers);
    if owner == a.own().id { (b, a) } else { (a, b) }
}

#[tokio::test]
async fn single_node_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(&dir).await;

    node.store_key("alpha", "1").await.unwrap();
    assert_eq!(node.find_key("alpha").await.unwrap().as_deref(), Some("1"));

    node.store_key("alpha", "2").await.unwrap();
    assert_eq!(node.find_key("alpha").await.unwrap().as_deref(), Some("2"));

    node.delete_key("alpha").await.unwrap();
    node.delete_key("alpha").await.unwrap();
    assert_eq!(node.find_key("alpha").await.unwrap(), None);

    node.shutdown().await;
}

#[tokio::test]
async fn seed_starts_with_itself_as_sole_member() {
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(&dir).await;
    let peers = node.peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0], *node.own());
    node.shutdown().await;
}

#[tokio::test]
async fn http_front_serves_the_rest_api() {
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(&dir).await;
    let addr = start_http(Arc::clone(&node)).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    // put → success envelope
    let resp = client
        .post(format!("{base}/put"))
        .json(&serde_json::json!({"key": "alpha", "value": "1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["key"], "alpha");

    // get → stored value
    let resp = client.get(format!("{base}/get/alpha")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["value"], "1");

    // get of a missing key → 404
    let resp = client.get(format!("{base}/get/ghost")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Key not found");

    // delete → deleted envelope, then the key is gone
    let resp = client
        .delete(format!("{base}/delete/alpha"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "deleted");
    let resp = client.get(format!("{base}/get/alpha")).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    // deleting a key never put is still 200
    let resp = client
        .delete(format!("{base}/delete/missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "deleted");
    assert_eq!(body["key"], "missing");

    // health and ring
    let body: serde_json::Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["peers"], 1);

    let ring: Vec<Peer> = client
        .get(format!("{base}/ring"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ring.len(), 1);
    assert_eq!(ring[0], *node.own());

    node.shutdown().await;
}

#[tokio::test]
async fn join_converges_both_membership_tables() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let a = start_node(&dir_a).await;
    let b = start_node(&dir_b).await;

    b.join(&a.own().addr()).await.unwrap();

    let ids_a: Vec<u64> = a.peers().iter().map(|p| p.id).collect();
    let ids_b: Vec<u64> = b.peers().iter().map(|p| p.id).collect();
    assert_eq!(ids_a.len(), 2);
    assert_eq!(ids_a, ids_b);
    assert!(ids_a.windows(2).all(|w| w[0] < w[1]), "table not sorted");

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn ring_endpoints_agree_after_join() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let a = start_node(&dir_a).await;
    let b = start_node(&dir_b).await;
    let http_a = start_http(Arc::clone(&a)).await;
    let http_b = start_http(Arc::clone(&b)).await;

    b.join(&a.own().addr()).await.unwrap();

    let client = reqwest::Client::new();
    let ring_a: Vec<Peer> = client
        .get(format!("http://{http_a}/ring"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ring_b: Vec<Peer> = client
        .get(format!("http://{http_b}/ring"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ring_a.len(), 2);
    assert_eq!(ring_a, ring_b);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn keys_are_stored_on_their_owner_and_survive_its_restart() {
    let dirs = [tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap()];
    let a = start_node(&dirs[0]).await;
    let b = start_node(&dirs[1]).await;
    b.join(&a.own().addr()).await.unwrap();

    // Written through the non-owner, the key must land on its owner.
    let key = "alpha";
    let (writer, owner) = orient(key, &a, &b);
    let owner_dir = if owner.own().id == a.own().id {
        &dirs[0]
    } else {
        &dirs[1]
    };
    let (writer, owner) = (Arc::clone(writer), Arc::clone(owner));
    writer.store_key(key, "x").await.unwrap();

    // The writer holds no copy: stop it and the value is still there.
    writer.shutdown().await;
    assert_eq!(owner.find_key(key).await.unwrap().as_deref(), Some("x"));

    // The slice is durable across a restart of the owner.
    let port = owner.own().port;
    owner.shutdown().await;
    let mut config = test_config(owner_dir);
    config.peer_port = port;
    let revived = Node::bind(&config).await.unwrap();
    assert_eq!(revived.find_key(key).await.unwrap().as_deref(), Some("x"));
    revived.shutdown().await;
}

#[tokio::test]
async fn writes_for_a_dead_owner_are_still_acknowledged() {
    // The transport exhausts its retries, logs, and the write path
    // reports success anyway. That is the policy this store ships with.
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let a = start_node(&dir_a).await;
    let b = start_node(&dir_b).await;
    b.join(&a.own().addr()).await.unwrap();

    let key = "omega";
    let (alive, dead) = orient(key, &a, &b);
    let (alive, dead) = (Arc::clone(alive), Arc::clone(dead));
    dead.shutdown().await;

    alive.store_key(key, "lost").await.unwrap();
    alive.delete_key(key).await.unwrap();
    // A read of an unreachable owner degrades to not-found.
    assert_eq!(alive.find_key(key).await.unwrap(), None);

    alive.shutdown().await;
}

#[tokio::test]
async fn join_against_an_unreachable_seed_fails() {
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(&dir).await;

    // Bind-then-drop yields a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let seed = listener.local_addr().unwrap().to_string();
    drop(listener);

    let err = node.join(&seed).await;
    assert!(matches!(err, Err(NodeError::ForwardingFailed { .. })));
    node.shutdown().await;
}

/// Raw exchange against a node's peer listener.
async fn raw_exchange(addr: &str, payload: &[u8]) -> Option<serde_json::Value> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(payload).await.unwrap();
    write_half.shutdown().await.unwrap();
    let mut reader = BufReader::new(read_half);
    let frame = proto::read_frame(&mut reader, 65536).await.unwrap()?;
    Some(serde_json::from_slice(&frame).unwrap())
}

#[tokio::test]
async fn peer_protocol_answers_errors_instead_of_dropping() {
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(&dir).await;
    let addr = node.own().addr();

    // Unknown operation
    let reply = raw_exchange(&addr, b"{\"operation\":\"drop_ring\"}\n")
        .await
        .unwrap();
    assert_eq!(reply["status"], "error");

    // Malformed JSON
    let reply = raw_exchange(&addr, b"this is not json\n").await.unwrap();
    assert_eq!(reply["status"], "error");

    // A well-formed find for a missing key
    let reply = raw_exchange(&addr, b"{\"operation\":\"find_key\",\"key\":\"ghost\"}\n")
        .await
        .unwrap();
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["message"], "Key not found");

    // The listener survived all of the above.
    let reply = raw_exchange(
        &addr,
        b"{\"operation\":\"store_key\",\"key\":\"k\",\"value\":\"v\"}\n",
    )
    .await
    .unwrap();
    assert_eq!(reply["status"], "stored");
    assert_eq!(reply["key"], "k");

    node.shutdown().await;
}

#[tokio::test]
async fn update_nodes_replaces_the_table_but_keeps_self() {
    let dir = tempfile::tempdir().unwrap();
    let node = start_node(&dir).await;
    let addr = node.own().addr();

    // A broadcast that does not mention the receiving node.
    let mut framed = serde_json::to_vec(&serde_json::json!({
        "operation": "update_nodes",
        "nodes": [[1u64, "10.0.0.1", 7000u16], [2u64, "10.0.0.2", 7000u16]],
    }))
    .unwrap();
    framed.push(b'\n');

    // No reply is expected; the server just closes.
    assert_eq!(raw_exchange(&addr, &framed).await, None);

    let ids: Vec<u64> = node.peers().iter().map(|p| p.id).collect();
    assert!(ids.contains(&1));
    assert!(ids.contains(&2));
    assert!(ids.contains(&node.own().id), "own descriptor was dropped");

    node.shutdown().await;
}
