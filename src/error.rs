//! Error types for live-debug.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use live_debug::{Result, Error};
//!
//! async fn example(channel: &Channel) -> Result<()> {
//!     let state = channel.request("steps.state", json!({})).await?;
//!     channel.notify("log.expression", state)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::RequestTimeout`] |
//! | Peer | [`Error::PeerNotReady`] |
//! | Protocol | [`Error::Protocol`], [`Error::DuplicateMethod`], [`Error::Remote`] |
//! | Capability | [`Error::HandlerInstallation`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |
//!
//! Releasing a pairing twice is not an error case: the ledger hands out each
//! resource once and [`Disposable::dispose`](crate::Disposable::dispose)
//! consumes it.

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when server or client options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when a channel cannot be established or a frame cannot be
    /// written.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Channel closed.
    ///
    /// Returned when sending on, or awaiting a reply from, a closed channel.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timeout.
    ///
    /// Returned when the peer does not answer a request in time.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The remote endpoint is not listening yet.
    ///
    /// Recoverable: the caller may retry after a delay.
    #[error("Peer not ready at {host}:{port}")]
    PeerNotReady {
        /// Host that was dialed.
        host: String,
        /// Port that was dialed.
        port: u16,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// A request handler is already installed for the method.
    #[error("Request handler already installed for: {method}")]
    DuplicateMethod {
        /// The contested method.
        method: String,
    },

    /// The peer answered a request with an error.
    #[error("Remote error {code}: {message}")]
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// Error message sent by the peer.
        message: String,
    },

    // ========================================================================
    // Capability Errors
    // ========================================================================
    /// A capability failed to install itself on a channel.
    ///
    /// Only the affected (connection, handler) pair is abandoned.
    #[error("Handler '{handler}' failed to install: {message}")]
    HandlerInstallation {
        /// Name of the failing capability.
        handler: String,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a peer not ready error.
    #[inline]
    pub fn peer_not_ready(host: impl Into<String>, port: u16) -> Self {
        Self::PeerNotReady {
            host: host.into(),
            port,
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a duplicate method error.
    #[inline]
    pub fn duplicate_method(method: impl Into<String>) -> Self {
        Self::DuplicateMethod {
            method: method.into(),
        }
    }

    /// Creates a remote error from a JSON-RPC error object.
    #[inline]
    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
        }
    }

    /// Creates a handler installation error.
    #[inline]
    pub fn handler_installation(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerInstallation {
            handler: handler.into(),
            message: message.into(),
        }
    }

    /// Classifies a failed dial.
    ///
    /// A refused TCP connection means nothing listens on the port yet.
    pub(crate) fn from_dial(err: WsError, host: &str, port: u16) -> Self {
        match err {
            WsError::Io(io) if io.kind() == ErrorKind::ConnectionRefused => {
                Self::peer_not_ready(host, port)
            }
            other => Self::WebSocket(other),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a peer not ready error.
    #[inline]
    #[must_use]
    pub fn is_peer_not_ready(&self) -> bool {
        matches!(self, Self::PeerNotReady { .. })
    }

    /// Returns `true` if this is a transport-level error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::PeerNotReady { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::PeerNotReady { .. } | Self::RequestTimeout { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
