//! Wire protocol message types.
//!
//! Channels exchange JSON-RPC 2.0 messages encoded as WebSocket text frames.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Either | Call expecting a reply |
//! | `Response` | Either | Reply to a request |
//! | `Notification` | Either | One-way capability event |
//!
//! # Method Naming
//!
//! Methods follow `capability.methodName` format:
//!
//! - `liveLog.logExpression`
//! - `steps.updateState`

// ============================================================================
// Submodules
// ============================================================================

/// JSON-RPC envelope types.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use message::{
    INTERNAL_ERROR, METHOD_NOT_FOUND, Message, Notification, Request, Response, RpcError, Version,
};
