//! Live debug - connection/handler multiplexing for live debugging.
//!
//! An editor-side server and any number of debuggee processes exchange
//! JSON-RPC messages over WebSocket. Capabilities (live logging, step
//! control, ...) are registered once and wired onto every connection,
//! present and future; withdrawing a capability or losing a connection
//! releases exactly the affected wiring.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                      ┌──────────────────────┐
//! │  LiveDebugServer     │      WebSocket       │  LiveDebugContext    │
//! │  (editor)            │◄────────────────────►│  (debuggee)          │
//! │                      │   localhost:PORT     │                      │
//! │  handlers × conns    │                      │  initializers × conns│
//! │  = PairingEngine     │                      │  = PairingEngine     │
//! └──────────────────────┘                      └──────────────────────┘
//! ```
//!
//! Both sides run the same [`PairingEngine`]: every open connection is
//! paired with every registered [`Capability`], at most once, and each
//! pairing's [`Disposable`] is released exactly once.
//!
//! # Quick Start
//!
//! ```no_run
//! use live_debug::{
//!     ClientOptions, LiveDebugContext, LiveDebugServer, Result, ServerOptions, capability_fn,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Editor side
//!     let server = LiveDebugServer::bind(ServerOptions::default()).await?;
//!     let _live_log = server.register_handler(capability_fn("live-log", |channel, _closed| {
//!         Ok(channel.on_notification("liveLog.logExpression", |params| {
//!             println!("{params}");
//!         }))
//!     }));
//!
//!     // Debuggee side
//!     let ctx = LiveDebugContext::websocket(ClientOptions::default().with_host("127.0.0.1"))?;
//!     let _init = ctx
//!         .register_initializer(capability_fn("live-log", |_channel, _closed| {
//!             Ok(live_debug::Disposable::empty())
//!         }))
//!         .await;
//!     ctx.request_connect(server.port()).await?;
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`capability`] | The [`Capability`] trait |
//! | [`client`] | Debuggee side: [`LiveDebugContext`] |
//! | [`disposable`] | Release-once resources |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`options`] | Configuration |
//! | [`protocol`] | JSON-RPC message types |
//! | [`registry`] | Connection/handler registries and [`PairingEngine`] |
//! | [`server`] | Editor side: [`LiveDebugServer`] |
//! | [`transport`] | WebSocket channels |

// ============================================================================
// Modules
// ============================================================================

/// Capabilities installed onto channels.
pub mod capability;

/// Debuggee side.
///
/// Use [`LiveDebugContext::new`] to create a context, then register
/// initializers and request connections.
pub mod client;

/// Release-once resources.
pub mod disposable;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Server, client and channel configuration.
pub mod options;

/// JSON-RPC message types.
pub mod protocol;

/// Connection and handler registries.
pub mod registry;

/// Editor side.
pub mod server;

/// WebSocket transport layer.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Capabilities
pub use capability::{Capability, FnCapability, capability_fn};

// Client types
pub use client::{
    ConnectOutcome, ContextState, LiveDebugContext, PendingServer, connect_with_retry,
};

// Resources
pub use disposable::Disposable;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, HandlerId, ListenerId, PairingId, RequestId};

// Options
pub use options::{ChannelOptions, ClientOptions, RetryPolicy, ServerOptions};

// Registry types
pub use registry::{Deregistration, Pairing, PairingEngine};

// Server types
pub use server::LiveDebugServer;

// Transport types
pub use transport::{
    Channel, ClosedSignal, Connector, Listener, ListeningSignal, WebSocketConnector,
};
