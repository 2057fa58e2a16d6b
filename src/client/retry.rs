//! Bounded reconnect for servers that are still starting.

use tracing::{debug, warn};

use crate::error::Result;
use crate::options::RetryPolicy;

use super::context::{ConnectOutcome, LiveDebugContext};

/// Requests a connection, retrying while the server is not ready.
///
/// Only [`Error::PeerNotReady`](crate::Error::PeerNotReady) is retried, with
/// a fixed pause of `policy.backoff`, for at most `policy.max_attempts`
/// attempts in total. Any other error is returned at once.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted.
pub async fn connect_with_retry(
    ctx: &LiveDebugContext,
    port: u16,
    policy: &RetryPolicy,
) -> Result<ConnectOutcome> {
    policy.validate()?;

    let mut attempt = 1;
    loop {
        match ctx.request_connect(port).await {
            Err(e) if e.is_peer_not_ready() && attempt < policy.max_attempts => {
                debug!(
                    port,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "Server not ready, retrying"
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(port, attempt, error = %e, "Giving up on server");
                return Err(e);
            }
            Ok(outcome) => return Ok(outcome),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
