//! Debuggee side.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `context` | Initializers, parked ports and server connections |
//! | `retry` | Bounded reconnect |

// ============================================================================
// Submodules
// ============================================================================

/// Auto-connect context.
pub mod context;

/// Bounded reconnect.
pub mod retry;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::{ConnectOutcome, ContextState, LiveDebugContext, PendingServer};
pub use retry::connect_with_retry;
