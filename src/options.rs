//! Server, client and channel configuration.
//!
//! Plain option structs with type-safe builder methods.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use live_debug::{ClientOptions, RetryPolicy};
//!
//! let options = ClientOptions::new()
//!     .with_host("127.0.0.1")
//!     .with_retry(RetryPolicy::new(5, Duration::from_millis(500)));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a request awaiting its response.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum pending requests per channel before rejecting new ones.
const DEFAULT_MAX_PENDING_REQUESTS: usize = 100;

/// Host dialed by the client side.
const DEFAULT_HOST: &str = "localhost";

/// Attempts made by the reference retry policy.
const DEFAULT_RETRY_ATTEMPTS: u32 = 10;

/// Pause between attempts of the reference retry policy.
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

// ============================================================================
// ChannelOptions
// ============================================================================

/// Per-channel request limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Timeout for [`Channel::request`](crate::Channel::request).
    pub request_timeout: Duration,

    /// Maximum requests awaiting a response at once.
    pub max_pending_requests: usize,
}

impl ChannelOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
        }
    }

    /// Sets the request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the pending request limit.
    #[inline]
    #[must_use]
    pub fn with_max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }

    /// Checks the options for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on a zero timeout or a zero pending limit.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(Error::config("request_timeout must be greater than zero"));
        }
        if self.max_pending_requests == 0 {
            return Err(Error::config(
                "max_pending_requests must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ServerOptions
// ============================================================================

/// Live-debug server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Address to bind (localhost by default).
    pub bind_ip: IpAddr,

    /// Port to bind (0 lets the OS choose).
    pub port: u16,

    /// Options for every accepted channel.
    pub channel: ChannelOptions,
}

impl ServerOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            channel: ChannelOptions::new(),
        }
    }

    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    /// Sets a fixed port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the channel options.
    #[inline]
    #[must_use]
    pub fn with_channel(mut self, channel: ChannelOptions) -> Self {
        self.channel = channel;
        self
    }

    /// Checks the options for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the channel options are invalid.
    pub fn validate(&self) -> Result<()> {
        self.channel.validate()
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RetryPolicy
// ============================================================================

/// Bounded retry for dials that fail with
/// [`Error::PeerNotReady`](crate::Error::PeerNotReady).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Fixed pause between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    #[inline]
    #[must_use]
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A single attempt, no retry.
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Checks the policy for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_attempts` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    /// Ten attempts, one second apart.
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BACKOFF)
    }
}

// ============================================================================
// ClientOptions
// ============================================================================

/// Debuggee-side configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Host to dial.
    pub host: String,

    /// Options for every outbound channel.
    pub channel: ChannelOptions,

    /// Retry policy used by [`connect_with_retry`](crate::client::connect_with_retry).
    pub retry: RetryPolicy,
}

impl ClientOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            channel: ChannelOptions::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the host to dial.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the channel options.
    #[inline]
    #[must_use]
    pub fn with_channel(mut self, channel: ChannelOptions) -> Self {
        self.channel = channel;
        self
    }

    /// Sets the retry policy.
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checks the options for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on an empty host, invalid channel options or
    /// an invalid retry policy.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("host must not be empty"));
        }
        self.channel.validate()?;
        self.retry.validate()
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_defaults() {
        let options = ChannelOptions::default();
        assert_eq!(options.request_timeout.as_secs(), 30);
        assert_eq!(options.max_pending_requests, 100);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_channel_validation() {
        let zero_timeout = ChannelOptions::new().with_request_timeout(Duration::ZERO);
        assert!(matches!(zero_timeout.validate(), Err(Error::Config { .. })));

        let zero_pending = ChannelOptions::new().with_max_pending_requests(0);
        assert!(zero_pending.validate().is_err());
    }

    #[test]
    fn test_server_defaults() {
        let options = ServerOptions::default();
        assert_eq!(options.bind_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(options.port, 0);
    }

    #[test]
    fn test_server_builder() {
        let options = ServerOptions::new()
            .with_port(9229)
            .with_bind_ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(options.port, 9229);
        assert_eq!(options.bind_ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn test_retry_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.backoff, Duration::from_secs(1));
        assert_eq!(RetryPolicy::none().max_attempts, 1);
        assert!(RetryPolicy::new(0, Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_client_defaults_and_validation() {
        let options = ClientOptions::default();
        assert_eq!(options.host, "localhost");
        assert!(options.validate().is_ok());

        assert!(ClientOptions::new().with_host("  ").validate().is_err());
        assert!(
            ClientOptions::new()
                .with_retry(RetryPolicy::new(0, Duration::ZERO))
                .validate()
                .is_err()
        );
    }
}
