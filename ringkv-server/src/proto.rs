//! Peer protocol messages and framing.
//!
//! One JSON object per direction per connection: the client writes a
//! request, the server writes at most one reply and closes. Frames are
//! newline-delimited with an explicit size bound; a frame terminated by
//! EOF instead of `\n` is also accepted, so a peer that just closes its
//! write half after the JSON still interoperates.
//!
//! ```json
//! {"operation":"find_key","key":"alpha"}
//! {"status":"success","key":"alpha","value":"1"}
//! ```
//!
//! `update_nodes` is the one exchange with no reply: the server closes
//! the socket and the sender reads a clean EOF, which [`read_frame`]
//! reports as `None`.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NodeError;
use crate::membership::Peer;

/// Upper bound on a single frame unless configured otherwise.
pub const DEFAULT_FRAME_LIMIT: usize = 64 * 1024;

/// Requests exchanged between ring members, tagged by `operation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation")]
pub enum Request {
    /// Store a key-value pair on its owner.
    #[serde(rename = "store_key")]
    StoreKey { key: String, value: String },

    /// Look a key up on its owner.
    #[serde(rename = "find_key")]
    FindKey { key: String },

    /// Remove a key from its owner.
    #[serde(rename = "delete_key")]
    DeleteKey { key: String },

    /// Admission request carrying the joiner's descriptor.
    #[serde(rename = "register_node")]
    RegisterNode { node: Peer },

    /// Full-table broadcast sent after an admission. Carries every known
    /// descriptor as a `[node_id, ip, port]` triple.
    #[serde(rename = "update_nodes")]
    UpdateNodes { nodes: Vec<(u64, String, u16)> },
}

/// Replies, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "stored")]
    Stored { key: String },

    #[serde(rename = "success")]
    Success { key: String, value: String },

    #[serde(rename = "deleted")]
    Deleted { key: String },

    #[serde(rename = "registered")]
    Registered,

    #[serde(rename = "error")]
    Error { message: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    pub fn not_found() -> Self {
        Response::error("Key not found")
    }
}

/// Read one newline- or EOF-terminated frame, bounded by `limit` bytes.
///
/// Returns `None` on a clean zero-byte EOF (the empty reply).
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>, NodeError>
where
    R: AsyncBufRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    let mut buf = Vec::new();
    // The take() bound keeps an oversized or delimiter-less frame from
    // growing the buffer without limit.
    let mut bounded = reader.take(limit as u64 + 1);
    let n = bounded.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.len() > limit {
        return Err(NodeError::Protocol(format!(
            "frame exceeds {limit} bytes"
        )));
    }
    Ok(Some(buf))
}

/// Write one JSON frame followed by a newline.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), NodeError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}
