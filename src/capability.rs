//! Capability handlers.
//!
//! A capability (live logging, step control, ...) is wired onto a channel by
//! [`Capability::install`], which declares the capability's requests and
//! notifications on that channel and returns a [`Disposable`] undoing the
//! installation. Registries hold capabilities uniformly as
//! `Arc<dyn Capability>`; the same trait serves server-side handlers and
//! client-side initializers.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::disposable::Disposable;
use crate::error::Result;
use crate::transport::{Channel, ClosedSignal};

// ============================================================================
// Capability
// ============================================================================

/// Installs one capability onto a channel.
///
/// # Example
///
/// ```ignore
/// struct LiveLog;
///
/// impl Capability for LiveLog {
///     fn name(&self) -> &str {
///         "live-log"
///     }
///
///     fn install(&self, channel: &Channel, _closed: ClosedSignal) -> Result<Disposable> {
///         Ok(channel.on_notification("liveLog.logExpression", |params| {
///             tracing::info!(%params, "live log");
///         }))
///     }
/// }
/// ```
pub trait Capability: Send + Sync + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &str {
        "capability"
    }

    /// Wires the capability onto `channel`.
    ///
    /// `closed` fires when the channel ends. The returned resource is
    /// released when either the channel closes or the capability is
    /// withdrawn, whichever happens first.
    ///
    /// # Errors
    ///
    /// An error abandons this one installation; other channels and other
    /// capabilities are unaffected.
    fn install(&self, channel: &Channel, closed: ClosedSignal) -> Result<Disposable>;
}

// ============================================================================
// FnCapability
// ============================================================================

/// A [`Capability`] backed by a closure.
pub struct FnCapability<F> {
    name: String,
    install: F,
}

impl<F> Capability for FnCapability<F>
where
    F: Fn(&Channel, ClosedSignal) -> Result<Disposable> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn install(&self, channel: &Channel, closed: ClosedSignal) -> Result<Disposable> {
        (self.install)(channel, closed)
    }
}

impl<F> fmt::Debug for FnCapability<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCapability")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Wraps a closure as a shareable capability.
pub fn capability_fn<F>(name: impl Into<String>, install: F) -> Arc<dyn Capability>
where
    F: Fn(&Channel, ClosedSignal) -> Result<Disposable> + Send + Sync + 'static,
{
    Arc::new(FnCapability {
        name: name.into(),
        install,
    })
}

// ============================================================================
// Tests
// ============================================================================
