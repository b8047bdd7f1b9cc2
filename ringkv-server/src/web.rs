//! HTTP front door: REST verbs mapped onto node operations.
//!
//! Any node serves the whole key space; the node routes each request to
//! the owner itself. Write endpoints return the status envelopes of the
//! peer protocol; `/health` and `/ring` are read-only observability.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::error::NodeError;
use crate::membership::Peer;
use crate::node::Node;

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/put", post(put_key))
        .route("/get/{key}", get(get_key))
        .route("/delete/{key}", delete(delete_key))
        .route("/health", get(health))
        .route("/ring", get(ring))
        .layer(CorsLayer::permissive())
        .with_state(node)
}

#[derive(Debug, Deserialize)]
struct PutBody {
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct StatusKey {
    status: &'static str,
    key: String,
}

#[derive(Debug, Serialize)]
struct StatusKeyValue {
    status: &'static str,
    key: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct StatusError {
    status: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    node_id: u64,
    peers: usize,
}

fn error_reply(code: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        code,
        Json(StatusError {
            status: "error",
            message: message.into(),
        }),
    )
        .into_response()
}

async fn put_key(
    State(node): State<Arc<Node>>,
    Json(body): Json<PutBody>,
) -> impl IntoResponse {
    match node.store_key(&body.key, &body.value).await {
        Ok(()) => Json(StatusKey {
            status: "success",
            key: body.key,
        })
        .into_response(),
        Err(e) => error_reply(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn get_key(
    State(node): State<Arc<Node>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    match node.find_key(&key).await {
        Ok(Some(value)) => Json(StatusKeyValue {
            status: "success",
            key,
            value,
        })
        .into_response(),
        Ok(None) => error_reply(StatusCode::NOT_FOUND, NodeError::NotFound.to_string()),
        Err(e) => error_reply(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn delete_key(
    State(node): State<Arc<Node>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    match node.delete_key(&key).await {
        Ok(()) => Json(StatusKey {
            status: "deleted",
            key,
        })
        .into_response(),
        Err(e) => error_reply(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn health(State(node): State<Arc<Node>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        node_id: node.own().id,
        peers: node.peers().len(),
    })
}

async fn ring(State(node): State<Arc<Node>>) -> Json<Vec<Peer>> {
    Json(node.peers().as_ref().clone())
}
