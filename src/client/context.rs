//! Debuggee-side auto-connect.
//!
//! A debuggee learns server ports out of band (e.g. from the editor that
//! launched it) and asks its [`LiveDebugContext`] to connect. Ports requested
//! before any initializer exists are parked as [`PendingServer`]s and dialed
//! once the first initializer registers.
//!
//! # Port Lifecycle
//!
//! ```text
//!            request_connect (no initializer)
//!   (none) ─────────────────────────────────► pending
//!     │                                          │ register_initializer
//!     │ request_connect                          ▼
//!     └─────────────────────────────────────► connecting ──► connected
//!                                                │ error        │ closed
//!                                                ▼              ▼
//!                                              (none)         (none)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capability::Capability;
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::options::ClientOptions;
use crate::registry::{Deregistration, PairingEngine};
use crate::transport::{Connector, WebSocketConnector};

// ============================================================================
// Types
// ============================================================================

/// A server port requested before any initializer was registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PendingServer {
    /// Port to dial.
    pub port: u16,
}

/// Result of [`LiveDebugContext::request_connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// No initializer yet; the port was parked.
    Pending,
    /// Another request for the port is in flight.
    AlreadyConnecting,
    /// The port already has an open connection.
    AlreadyConnected(ConnectionId),
    /// A new connection was opened and wired.
    Connected(ConnectionId),
}

impl ConnectOutcome {
    /// Returns the connection ID if the port is connected.
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        match self {
            Self::AlreadyConnected(id) | Self::Connected(id) => Some(*id),
            Self::Pending | Self::AlreadyConnecting => None,
        }
    }
}

/// Ports carried from one context instance to the next.
///
/// Serializable so a host can persist it across a reload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextState {
    /// Ports that were pending or open, in ascending order.
    pub pending_servers: Vec<PendingServer>,
}

#[derive(Default)]
struct Ports {
    pending: Vec<PendingServer>,
    connecting: FxHashSet<u16>,
    connected: FxHashMap<u16, ConnectionId>,
    /// Set by handoff; dials still in flight must not land here.
    handed_off: bool,
}

struct Inner {
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    engine: PairingEngine,
    ports: Mutex<Ports>,
}

// ============================================================================
// LiveDebugContext
// ============================================================================

/// Process-scoped set of initializers and server connections.
///
/// Cloning is cheap; clones share state.
///
/// # Example
///
/// ```ignore
/// let ctx = LiveDebugContext::websocket(ClientOptions::default())?;
///
/// // Port arrives before anything can handle it: parked.
/// assert_eq!(ctx.request_connect(9229).await?, ConnectOutcome::Pending);
///
/// // First initializer dials every parked port.
/// let _steps = ctx.register_initializer(capability_fn("steps", install_steps)).await;
/// ```
#[derive(Clone)]
pub struct LiveDebugContext {
    inner: Arc<Inner>,
}

// ============================================================================
// LiveDebugContext - Constructors
// ============================================================================

impl LiveDebugContext {
    /// Creates a context dialing through `connector`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the options are
    /// invalid.
    pub fn new(options: ClientOptions, connector: Arc<dyn Connector>) -> Result<Self> {
        options.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                options,
                connector,
                engine: PairingEngine::new(),
                ports: Mutex::new(Ports::default()),
            }),
        })
    }

    /// Creates a context dialing over WebSocket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the options are
    /// invalid.
    pub fn websocket(options: ClientOptions) -> Result<Self> {
        let connector = Arc::new(WebSocketConnector::new(options.channel.clone()));
        Self::new(options, connector)
    }

    /// Creates a context that takes over the ports of a previous instance.
    ///
    /// The ports become pending and are dialed once an initializer registers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the options are
    /// invalid.
    pub fn with_state(
        options: ClientOptions,
        connector: Arc<dyn Connector>,
        state: ContextState,
    ) -> Result<Self> {
        let ctx = Self::new(options, connector)?;

        {
            let mut ports = ctx.inner.ports.lock();
            for server in state.pending_servers {
                if !ports.pending.contains(&server) {
                    ports.pending.push(server);
                }
            }
        }

        debug!(
            pending = ctx.inner.ports.lock().pending.len(),
            "Context restored from previous instance"
        );

        Ok(ctx)
    }
}

// ============================================================================
// LiveDebugContext - Connect
// ============================================================================

impl LiveDebugContext {
    /// Asks the context to connect to the server on `port`.
    ///
    /// # Errors
    ///
    /// Returns the connector's error; [`Error::PeerNotReady`] if nothing
    /// listens on the port yet. Nothing is retried here, see
    /// [`connect_with_retry`](super::connect_with_retry).
    ///
    /// Fails with [`Error::Connection`] once the context was handed off,
    /// including for a dial that was in flight during the handoff.
    ///
    /// [`Error::PeerNotReady`]: crate::Error::PeerNotReady
    /// [`Error::Connection`]: crate::Error::Connection
    pub async fn request_connect(&self, port: u16) -> Result<ConnectOutcome> {
        let _marker = {
            let mut ports = self.inner.ports.lock();

            if ports.handed_off {
                return Err(Error::connection(format!(
                    "context handed off, not connecting to port {port}"
                )));
            }
            if ports.connecting.contains(&port) {
                return Ok(ConnectOutcome::AlreadyConnecting);
            }
            if let Some(id) = ports.connected.get(&port) {
                return Ok(ConnectOutcome::AlreadyConnected(*id));
            }
            if self.inner.engine.handler_count() == 0 {
                let server = PendingServer { port };
                if !ports.pending.contains(&server) {
                    ports.pending.push(server);
                    debug!(port, "Server parked until an initializer registers");
                }
                return Ok(ConnectOutcome::Pending);
            }

            ports.connecting.insert(port);
            ConnectingMarker {
                inner: Arc::downgrade(&self.inner),
                port,
            }
        };

        let host = &self.inner.options.host;
        let channel = self.inner.connector.connect(host, port).await?;
        let closed = channel.closed();

        let id = self.inner.engine.admit(channel.clone());
        {
            let mut ports = self.inner.ports.lock();
            if ports.handed_off {
                drop(ports);
                self.inner.engine.close(id);
                channel.shutdown();
                debug!(port, "Context handed off during dial, connection dropped");
                return Err(Error::connection(format!(
                    "context handed off while connecting to port {port}"
                )));
            }
            ports.connected.insert(port, id);
        }

        info!(port, connection = %id, "Connected to live-debug server");

        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            closed.wait().await;
            if let Some(inner) = inner.upgrade() {
                Self::on_closed(&inner, port, id);
            }
        });

        Ok(ConnectOutcome::Connected(id))
    }

    fn on_closed(inner: &Inner, port: u16, id: ConnectionId) {
        inner.engine.close(id);

        let mut ports = inner.ports.lock();
        if ports.connected.get(&port) == Some(&id) {
            ports.connected.remove(&port);
        }

        debug!(port, connection = %id, "Server connection closed");
    }
}

/// Clears the in-flight marker of a port, whether the dial finished or was
/// dropped.
struct ConnectingMarker {
    inner: Weak<Inner>,
    port: u16,
}

impl Drop for ConnectingMarker {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.ports.lock().connecting.remove(&self.port);
        }
    }
}

// ============================================================================
// LiveDebugContext - Initializers
// ============================================================================

impl LiveDebugContext {
    /// Registers an initializer.
    ///
    /// It is installed on every open connection at once and on every later
    /// one. Parked ports are then dialed; failures are logged, not returned.
    pub async fn register_initializer(&self, initializer: Arc<dyn Capability>) -> Deregistration {
        let registration = self.inner.engine.register(initializer);

        let parked = std::mem::take(&mut self.inner.ports.lock().pending);
        if !parked.is_empty() {
            debug!(count = parked.len(), "Connecting parked servers");
        }

        let attempts = parked.into_iter().map(|server| async move {
            (server.port, self.request_connect(server.port).await)
        });

        for (port, result) in join_all(attempts).await {
            if let Err(e) = result {
                warn!(port, error = %e, "Failed to connect parked server");
            }
        }

        registration
    }
}

// ============================================================================
// LiveDebugContext - Queries
// ============================================================================

impl LiveDebugContext {
    /// Returns the parked ports, in request order.
    #[must_use]
    pub fn pending_servers(&self) -> Vec<PendingServer> {
        self.inner.ports.lock().pending.clone()
    }

    /// Returns the ports with an open connection, ascending.
    #[must_use]
    pub fn connected_ports(&self) -> Vec<u16> {
        let mut ports: Vec<_> = self.inner.ports.lock().connected.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Returns the number of registered initializers.
    #[inline]
    #[must_use]
    pub fn initializer_count(&self) -> usize {
        self.inner.engine.handler_count()
    }

    /// Returns the options this context was created with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Returns the pairing engine wiring initializers to connections.
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &PairingEngine {
        &self.inner.engine
    }
}

// ============================================================================
// LiveDebugContext - Handoff
// ============================================================================

impl LiveDebugContext {
    /// Disposes this context and returns the ports it was serving.
    ///
    /// Ports that were parked, connected or still being dialed are carried
    /// over. Every connection is closed and every initializer dropped; clones
    /// of this context observe the emptied state and refuse new connects.
    #[must_use]
    pub fn handoff(self) -> ContextState {
        let mut pending_servers: Vec<PendingServer> = {
            let mut guard = self.inner.ports.lock();
            let ports = &mut *guard;
            ports.handed_off = true;
            let connected = ports.connected.drain().map(|(port, _)| port);
            let connecting = ports.connecting.iter().copied();
            let mut servers: Vec<_> = connected
                .chain(connecting)
                .map(|port| PendingServer { port })
                .collect();
            servers.append(&mut ports.pending);
            servers
        };

        self.inner.engine.shutdown();

        pending_servers.sort_unstable();
        pending_servers.dedup();

        info!(ports = pending_servers.len(), "Context handed off");

        ContextState { pending_servers }
    }
}

impl fmt::Debug for LiveDebugContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports = self.inner.ports.lock();
        f.debug_struct("LiveDebugContext")
            .field("host", &self.inner.options.host)
            .field("pending", &ports.pending)
            .field("connecting", &ports.connecting)
            .field("connected", &ports.connected)
            .field("handed_off", &ports.handed_off)
            .field("engine", &self.inner.engine)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
