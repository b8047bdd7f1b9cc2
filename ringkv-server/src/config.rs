//! Node configuration (command line).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::NodeError;
use crate::keyspace::KeySpace;
use crate::transport::RetryPolicy;

/// A Chord-style distributed key-value store node.
///
/// With no positional arguments the node starts as the seed of a new
/// ring. To join an existing ring, pass the seed address and the ports:
/// `ringkv-server <seed_host:seed_port> <peer_port> <http_port>`.
#[derive(Debug, Clone, Parser)]
#[command(name = "ringkv-server", version, about)]
pub struct NodeConfig {
    /// Seed node to join, as host:port. Omit to start a new ring.
    pub seed: Option<String>,

    /// TCP port for the peer protocol.
    #[arg(default_value_t = 6000)]
    pub peer_port: u16,

    /// TCP port for the HTTP API.
    #[arg(default_value_t = 5000)]
    pub http_port: u16,

    /// Address to bind and advertise to peers.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Root directory for per-node databases.
    #[arg(long, default_value = ".")]
    pub data_dir: PathBuf,

    /// Ring width in bits. Every node in a ring must use the same value.
    #[arg(long, default_value_t = KeySpace::DEFAULT_BITS)]
    pub ring_bits: u32,

    /// Upper bound on a single peer-protocol frame, in bytes.
    #[arg(long, default_value_t = 65536)]
    pub recv_limit: usize,

    /// Attempts per peer exchange before giving up.
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Timeout per peer exchange attempt, in seconds.
    #[arg(long, default_value_t = 5)]
    pub timeout_secs: u64,
}

impl NodeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries.max(1),
            timeout: Duration::from_secs(self.timeout_secs),
            backoff: Duration::from_secs(1),
            frame_limit: self.recv_limit,
        }
    }

    /// Validate and normalize the seed address.
    pub fn seed_addr(&self) -> Result<Option<String>, NodeError> {
        let Some(seed) = &self.seed else {
            return Ok(None);
        };
        let (host, port) = seed.rsplit_once(':').ok_or_else(|| {
            NodeError::Config(format!("invalid seed address '{seed}', expected host:port"))
        })?;
        let port: u16 = port.parse().map_err(|_| {
            NodeError::Config(format!("invalid seed port in '{seed}'"))
        })?;
        if host.is_empty() {
            return Err(NodeError::Config(format!(
                "invalid seed address '{seed}', empty host"
            )));
        }
        Ok(Some(format!("{host}:{port}")))
    }
}
