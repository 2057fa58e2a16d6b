//! JSON-RPC 2.0 message types.
//!
//! Every WebSocket text frame carries exactly one [`Message`].
//!
//! # Format
//!
//! Request (expects a response):
//! ```json
//! { "jsonrpc": "2.0", "id": 1, "method": "steps.requestUpdate", "params": {} }
//! ```
//!
//! Notification (fire and forget):
//! ```json
//! { "jsonrpc": "2.0", "method": "liveLog.logExpression", "params": { "value": "42" } }
//! ```
//!
//! Response:
//! ```json
//! { "jsonrpc": "2.0", "id": 1, "result": { ... } }
//! { "jsonrpc": "2.0", "id": 1, "error": { "code": -32601, "message": "..." } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Constants
// ============================================================================

/// The request method does not exist on the receiving end.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// The request handler failed.
pub const INTERNAL_ERROR: i64 = -32603;

// ============================================================================
// Version
// ============================================================================

/// The `"jsonrpc": "2.0"` marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == "2.0" {
            Ok(Self)
        } else {
            Err(de::Error::custom(format!(
                "unsupported jsonrpc version: {version}"
            )))
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// Any message exchanged over a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// A request awaiting a response.
    Request(Request),
    /// A response to an earlier request.
    Response(Response),
    /// A one-way notification.
    Notification(Notification),
}

// ============================================================================
// Request
// ============================================================================

/// A request expecting a [`Response`] with the same `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version marker.
    #[serde(default)]
    pub jsonrpc: Version,

    /// Correlation ID.
    pub id: RequestId,

    /// Method name, conventionally `capability.methodName`.
    pub method: String,

    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Creates a new request with an auto-generated ID.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: Version,
            id: RequestId::next(),
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// Notification
// ============================================================================

/// A one-way message; the receiver never answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Protocol version marker.
    #[serde(default)]
    pub jsonrpc: Version,

    /// Method name.
    pub method: String,

    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl Notification {
    /// Creates a new notification.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: Version,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// The answer to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version marker.
    #[serde(default)]
    pub jsonrpc: Version,

    /// Matches the request `id`.
    pub id: RequestId,

    /// Result data (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error object (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: Version,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn failure(id: RequestId, error: RpcError) -> Self {
        Self {
            jsonrpc: Version,
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the result value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the response carries an error object.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(Error::remote(error.code, error.message)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ============================================================================
// RpcError
// ============================================================================

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,

    /// Human-readable message.
    pub message: String,

    /// Optional structured data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Creates an error object without data.
    #[inline]
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Creates a method-not-found error object.
    #[inline]
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// Creates an internal error object from a handler failure.
    #[inline]
    #[must_use]
    pub fn internal(error: &Error) -> Self {
        Self::new(INTERNAL_ERROR, error.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
