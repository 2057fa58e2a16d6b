//! In-process transport.
//!
//! Connects two [`Channel`]s through an in-memory byte pipe instead of a
//! socket. Framing is still real WebSocket framing, so both ends behave
//! exactly like channels accepted by a [`Listener`](super::Listener).

// ============================================================================
// Imports
// ============================================================================

use tokio::io::duplex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Role;

use crate::options::ChannelOptions;

use super::Channel;

// ============================================================================
// Constants
// ============================================================================

/// Capacity of each direction of the in-memory pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

// ============================================================================
// memory_pair
// ============================================================================

/// Creates two connected channels: `(server_end, client_end)`.
///
/// Neither end is listening yet; see [`Channel::start_listening`].
pub async fn memory_pair(options: ChannelOptions) -> (Channel, Channel) {
    let (server_io, client_io) = duplex(PIPE_CAPACITY);

    let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    let client_ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

    (
        Channel::new(server_ws, options.clone()),
        Channel::new(client_ws, options),
    )
}
