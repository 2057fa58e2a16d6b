//! Live-debug server.
//!
//! Accepts debuggee connections on a single port and pairs each with every
//! registered handler.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            LiveDebugServer               │
//! │            (single port)                 │
//! │                                          │
//! │  accept loop ──► upgrade ──► serve ──┐   │
//! │                                      ▼   │
//! │                          PairingEngine   │
//! │  register_handler ───────────────────┘   │
//! └──────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capability::Capability;
use crate::error::Result;
use crate::options::ServerOptions;
use crate::registry::{Deregistration, PairingEngine};
use crate::transport::Listener;

// ============================================================================
// LiveDebugServer
// ============================================================================

/// Editor-side live-debug server.
///
/// Thread-safe; share it as `Arc<LiveDebugServer>`.
///
/// # Example
///
/// ```ignore
/// let server = LiveDebugServer::bind(ServerOptions::default()).await?;
/// let _live_log = server.register_handler(capability_fn("live-log", install_live_log));
///
/// // Hand server.port() to the debuggee...
///
/// server.shutdown().await;
/// ```
pub struct LiveDebugServer {
    /// Address the listener is bound to.
    local_addr: SocketAddr,

    /// Connections and handlers.
    engine: PairingEngine,

    /// Flipped once on shutdown.
    shutdown_tx: watch::Sender<bool>,

    /// Accept loop task, taken on shutdown.
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// LiveDebugServer - Constructor
// ============================================================================

impl LiveDebugServer {
    /// Binds the server and starts the accept loop.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if the options are invalid
    /// - [`Error::Io`](crate::Error::Io) if binding fails
    pub async fn bind(options: ServerOptions) -> Result<Arc<Self>> {
        options.validate()?;

        let listener = Listener::bind(options.bind_ip, options.port, options.channel).await?;
        let local_addr = listener.local_addr();
        let engine = PairingEngine::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(listener, engine.clone(), shutdown_rx));

        info!(port = local_addr.port(), "Live-debug server started");

        Ok(Arc::new(Self {
            local_addr,
            engine,
            shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        }))
    }
}

// ============================================================================
// LiveDebugServer - Public API
// ============================================================================

impl LiveDebugServer {
    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the local socket address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the WebSocket URL debuggees dial.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Returns the number of open connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.engine.connection_count()
    }

    /// Returns the pairing engine serving this server's connections.
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &PairingEngine {
        &self.engine
    }

    /// Registers a handler on every current and future connection.
    pub fn register_handler(&self, capability: Arc<dyn Capability>) -> Deregistration {
        self.engine.register(capability)
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[inline]
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

// ============================================================================
// LiveDebugServer - Lifecycle
// ============================================================================

impl LiveDebugServer {
    /// Stops accepting, closes every connection and releases every pairing.
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }

        info!(port = self.port(), "Live-debug server shutting down");

        let accept_task = self.accept_task.lock().take();
        if let Some(task) = accept_task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Accept loop ended abnormally");
        }

        // Per-peer tasks that already passed their shutdown check are refused
        // by the engine itself.
        self.engine.shutdown();

        info!("Live-debug server shutdown complete");
    }
}

impl Drop for LiveDebugServer {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

/// Accepts peers until shutdown; each peer is upgraded and served on its own
/// task.
async fn accept_loop(
    listener: Listener,
    engine: PairingEngine,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Accept loop started");

    loop {
        let accepted = tokio::select! {
            _ = shutdown.wait_for(|stopped| *stopped) => break,
            accepted = listener.accept_stream() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let engine = engine.clone();
                let options = listener.options().clone();
                let mut shutdown = shutdown.clone();

                tokio::spawn(async move {
                    let channel = tokio::select! {
                        _ = shutdown.wait_for(|stopped| *stopped) => return,
                        upgraded = Listener::upgrade(stream, addr, options) => upgraded,
                    };

                    match channel {
                        Ok(channel) if *shutdown.borrow() => channel.shutdown(),
                        Ok(channel) => {
                            let id = engine.serve(channel).await;
                            debug!(connection = %id, ?addr, "Connection finished");
                        }
                        Err(e) => {
                            warn!(error = %e, ?addr, "Connection handling failed");
                        }
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Accept failed");
            }
        }
    }

    debug!("Accept loop terminated");
}

// ============================================================================
// Tests
// ============================================================================
