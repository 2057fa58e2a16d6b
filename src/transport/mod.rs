//! WebSocket transport layer.
//!
//! This module carries JSON-RPC messages between the live-debug server
//! (editor side) and debuggee processes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Server         │                              │  Debuggee       │
//! │                 │         WebSocket            │                 │
//! │  Listener       │◄────────────────────────────►│  Connector      │
//! │  → Channel      │      localhost:PORT          │  → Channel      │
//! │                 │                              │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Channel Lifecycle
//!
//! 1. `Listener::bind` / `Connector::connect` - Establish the socket
//! 2. Capabilities install listeners on the `Channel`
//! 3. `Channel::start_listening` - Begin dispatching inbound messages
//! 4. `ClosedSignal` fires when either side ends the connection
//! 5. `ListeningSignal` fires once inbound dispatch begins
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | JSON-RPC channel and event loop |
//! | `connector` | Outbound connections |
//! | `listener` | Inbound connections |
//! | `memory` | In-process channel pairs |

// ============================================================================
// Submodules
// ============================================================================

/// JSON-RPC channel and event loop.
pub mod channel;

/// Outbound WebSocket connections.
pub mod connector;

/// WebSocket server socket.
pub mod listener;

/// In-process transport.
pub mod memory;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{
    Channel, ClosedSignal, ListeningSignal, NotificationHandler, RequestHandler,
};
pub use connector::{Connector, WebSocketConnector};
pub use listener::Listener;
pub use memory::memory_pair;
