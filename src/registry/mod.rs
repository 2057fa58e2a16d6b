//! Connection and handler registries.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 PairingEngine                    │
//! │                                                  │
//! │  ConnectionRegistry   HandlerRegistry   Ledger   │
//! │   conn-1 ─┐             handler-1 ─┐             │
//! │   conn-2 ─┼──── every × every ─────┼─► pairings  │
//! │   conn-3 ─┘             handler-2 ─┘             │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connections` | Open connections |
//! | `engine` | Pairing engine |
//! | `handlers` | Registered handlers |
//! | `ledger` | Active pairings and their resources |

// ============================================================================
// Submodules
// ============================================================================

/// Open connections by ID.
pub mod connections;

/// Pairing engine.
pub mod engine;

/// Registered handlers by ID.
pub mod handlers;

/// Active pairings.
pub mod ledger;

// ============================================================================
// Re-exports
// ============================================================================

pub use connections::ConnectionRegistry;
pub use engine::{Deregistration, Pairing, PairingEngine};
pub use handlers::HandlerRegistry;
pub use ledger::Ledger;
