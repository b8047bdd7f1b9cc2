//! Error kinds surfaced by the node core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    /// A lookup reached the owning node and its store had no such key.
    #[error("Key not found")]
    NotFound,

    /// The peer transport exhausted its retries without an acknowledgment.
    #[error("no response from {addr} after {attempts} attempts")]
    ForwardingFailed { addr: String, attempts: u32 },

    /// The embedded engine failed on put/get/delete.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The store was used after `close()`.
    #[error("store is closed")]
    StoreClosed,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON, an unknown operation, or an oversized frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Empty membership table at routing time, or an unusable configuration
    /// value such as a bad seed address.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Protocol(e.to_string())
    }
}
