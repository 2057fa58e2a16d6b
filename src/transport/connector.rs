//! Outbound connections.
//!
//! The client side dials servers through the [`Connector`] trait so the
//! auto-connect logic does not depend on a concrete transport.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::options::ChannelOptions;

use super::Channel;

// ============================================================================
// Connector
// ============================================================================

/// Establishes outbound channels.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Dials `host:port` and returns a channel that is not listening yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeerNotReady`] if nothing listens on the port yet.
    async fn connect(&self, host: &str, port: u16) -> Result<Channel>;
}

// ============================================================================
// WebSocketConnector
// ============================================================================

/// Dials `ws://{host}:{port}`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    options: ChannelOptions,
}

impl WebSocketConnector {
    /// Creates a connector applying `options` to every channel it opens.
    #[inline]
    #[must_use]
    pub fn new(options: ChannelOptions) -> Self {
        Self { options }
    }

    /// Builds the WebSocket URL for a peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `host` does not form a valid URL.
    pub fn url_for(host: &str, port: u16) -> Result<Url> {
        Url::parse(&format!("ws://{host}:{port}"))
            .map_err(|e| Error::config(format!("Invalid peer address {host}:{port}: {e}")))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Channel> {
        let url = Self::url_for(host, port)?;

        debug!(%url, "Dialing live-debug server");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::from_dial(e, host, port))?;

        info!(%url, "Connected to live-debug server");

        Ok(Channel::new(ws_stream, self.options.clone()))
    }
}

// ============================================================================
// Tests
// ============================================================================
