//! WebSocket listener for inbound debug clients.
//!
//! # Connection Flow
//!
//! 1. Bind to `localhost:0` (OS-assigned port)
//! 2. Hand the port to peers out of band (e.g. inside a debug-session request)
//! 3. Each peer dials `ws://127.0.0.1:{port}`
//! 4. [`Listener::accept`] upgrades the TCP stream and yields a [`Channel`]

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::options::ChannelOptions;

use super::Channel;

// ============================================================================
// Listener
// ============================================================================

/// A bound WebSocket server socket.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
/// use live_debug::transport::Listener;
///
/// let listener = Listener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, Default::default()).await?;
/// let ws_url = listener.ws_url();
///
/// // Tell the debuggee about ws_url...
///
/// let (channel, addr) = listener.accept().await?;
/// ```
pub struct Listener {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Address the listener is bound to.
    local_addr: SocketAddr,
    /// Options applied to every accepted channel.
    options: ChannelOptions,
}

impl Listener {
    /// Binds a WebSocket server to the specified address and port.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16, options: ChannelOptions) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let local_addr = listener.local_addr()?;

        debug!(port = local_addr.port(), "WebSocket listener bound");

        Ok(Self {
            listener,
            local_addr,
            options,
        })
    }

    /// Returns the port the listener is bound to.
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

    /// Returns the WebSocket URL for this listener.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Returns the options applied to accepted channels.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Accepts the next peer and completes the WebSocket upgrade.
    ///
    /// The returned channel is not listening yet.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the TCP accept fails
    /// - [`Error::Connection`] if the WebSocket upgrade fails
    pub async fn accept(&self) -> Result<(Channel, SocketAddr)> {
        let (stream, addr) = self.accept_stream().await?;
        let channel = Self::upgrade(stream, addr, self.options.clone()).await?;
        Ok((channel, addr))
    }

    /// Accepts the next TCP peer without upgrading it.
    ///
    /// Pair with [`upgrade`](Self::upgrade) to run the handshake off the
    /// accept loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the TCP accept fails.
    pub async fn accept_stream(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        debug!(?addr, "TCP connection accepted");
        Ok((stream, addr))
    }

    /// Completes the WebSocket handshake on an accepted stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the upgrade fails.
    pub async fn upgrade(
        stream: TcpStream,
        addr: SocketAddr,
        options: ChannelOptions,
    ) -> Result<Channel> {
        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        info!(?addr, "WebSocket connection established");

        Ok(Channel::new(ws_stream, options))
    }
}

// ============================================================================
// Tests
// ============================================================================
