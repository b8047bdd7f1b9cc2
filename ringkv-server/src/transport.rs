//! Outbound peer calls with bounded retry.
//!
//! One TCP connection per exchange: write the request, read at most one
//! reply, close. Transient failures are retried a fixed number of times
//! with a fixed pause; after the last attempt the call resolves to the
//! empty response and the failure is only logged. Callers must tolerate
//! the empty response.

use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::error::NodeError;
use crate::proto::{self, Request, Response};

/// Retry and timeout policy for one logical peer exchange.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts before giving up.
    pub attempts: u32,
    /// Timeout over a full connect-send-recv attempt.
    pub timeout: Duration,
    /// Pause between attempts.
    pub backoff: Duration,
    /// Upper bound on a reply frame.
    pub frame_limit: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(5),
            backoff: Duration::from_secs(1),
            frame_limit: proto::DEFAULT_FRAME_LIMIT,
        }
    }
}

/// Send one request to `addr` and wait for the reply.
///
/// `None` is the empty response: either the peer answered with a clean
/// close (the `update_nodes` exchange), or every attempt failed.
pub async fn send_request(addr: &str, request: &Request, policy: &RetryPolicy) -> Option<Response> {
    for attempt in 1..=policy.attempts {
        match tokio::time::timeout(policy.timeout, exchange(addr, request, policy.frame_limit))
            .await
        {
            Ok(Ok(reply)) => return reply,
            Ok(Err(e)) => tracing::warn!(addr, attempt, "Peer exchange failed: {e}"),
            Err(_) => tracing::warn!(addr, attempt, "Peer exchange timed out"),
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.backoff).await;
        }
    }
    tracing::error!(addr, attempts = policy.attempts, "Giving up on peer request");
    None
}

async fn exchange(
    addr: &str,
    request: &Request,
    frame_limit: usize,
) -> Result<Option<Response>, NodeError> {
    let stream = TcpStream::connect(addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    proto::write_frame(&mut write_half, request).await?;

    let mut reader = BufReader::new(read_half);
    match proto::read_frame(&mut reader, frame_limit).await? {
        None => Ok(None),
        Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
    }
}
