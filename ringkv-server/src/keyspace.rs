//! Consistent-hash identifier space.
//!
//! Keys and node addresses both map onto a modular ring `[0, 2^bits)`.
//! The mapping is SHA-256 reduced modulo the ring size, so equal inputs
//! produce equal positions on every node, in every process, on every run.

use sha2::{Digest, Sha256};

use crate::error::NodeError;

/// The modular ring that keys and node addresses are placed on.
///
/// `bits` is the ring width; every node in a cluster must be started with
/// the same value or the nodes disagree about key ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpace {
    bits: u32,
}

impl KeySpace {
    pub const DEFAULT_BITS: u32 = 16;

    pub fn new(bits: u32) -> Result<Self, NodeError> {
        if bits == 0 || bits > 64 {
            return Err(NodeError::Config(format!(
                "ring width must be between 1 and 64 bits, got {bits}"
            )));
        }
        Ok(Self { bits })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Map a byte string onto the ring.
    ///
    /// The 256-bit digest read as a big-endian integer, reduced modulo
    /// `2^bits`. Since `2^bits` divides `2^64`, the reduction equals
    /// masking the low `bits` bits of the digest's trailing eight bytes.
    pub fn hash(&self, bytes: &[u8]) -> u64 {
        let digest = Sha256::digest(bytes);
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&digest[24..32]);
        u64::from_be_bytes(tail) & self.mask()
    }

    /// Ring position of a node address, derived from the canonical
    /// `node_<host>:<port>` string.
    pub fn node_id(&self, host: &str, port: u16) -> u64 {
        self.hash(format!("node_{host}:{port}").as_bytes())
    }

    fn mask(&self) -> u64 {
        if self.bits == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits) - 1
        }
    }
}
