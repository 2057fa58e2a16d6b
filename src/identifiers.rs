//! Type-safe identifiers for live-debug entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//! Every ID is a process-unique, monotonically increasing `u64`; an ID is
//! never reused, so a re-registered handler always gets a fresh identity.
//!
//! | Type | Identifies |
//! |------|------------|
//! | [`ConnectionId`] | An admitted connection |
//! | [`HandlerId`] | A registered capability handler |
//! | [`PairingId`] | One (connection, handler) installation |
//! | [`ListenerId`] | A listener installed on a channel |
//! | [`RequestId`] | A JSON-RPC request on a channel |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// Macro
// ============================================================================

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Allocates the next process-unique ID.
            #[must_use]
            pub fn next() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(1);
                Self(COUNTER.fetch_add(1, Ordering::Relaxed))
            }

            /// Wraps a raw value.
            #[inline]
            #[must_use]
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Returns the raw value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

// ============================================================================
// Identifiers
// ============================================================================

define_id!(
    /// Identifies an admitted connection.
    ConnectionId,
    "conn"
);

define_id!(
    /// Identifies a registered capability handler.
    HandlerId,
    "handler"
);

define_id!(
    /// Handle to one (connection, handler) pairing in the ledger.
    PairingId,
    "pairing"
);

define_id!(
    /// Identifies a notification or request listener on a channel.
    ListenerId,
    "listener"
);

define_id!(
    /// JSON-RPC request ID used for request/response correlation.
    RequestId,
    "req"
);

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = HandlerId::next();
        let b = HandlerId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_display_prefix() {
        assert_eq!(ConnectionId::from_raw(7).to_string(), "conn-7");
        assert_eq!(RequestId::from_raw(3).to_string(), "req-3");
    }

    #[test]
    fn test_request_id_serializes_as_number() {
        let json = serde_json::to_string(&RequestId::from_raw(42)).unwrap();
        assert_eq!(json, "42");
        let id: RequestId = serde_json::from_str("42").unwrap();
        assert_eq!(id.as_u64(), 42);
    }
}
