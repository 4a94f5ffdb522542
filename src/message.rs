//! # Message Types Module
//!
//! The two value types that cross the socket: [`Request`] and [`Response`].
//! Both serialize field-for-field to UTF-8 JSON objects, the only wire
//! format on the datagram path.
//!
//! ## Message Lifecycle
//!
//! 1. **Creation**: A request is constructed with a fresh UUID and timestamp
//! 2. **Serialization**: Converted to JSON bytes for transport
//! 3. **Transmission**: Sent as one self-contained datagram
//! 4. **Deserialization**: Reconstructed from bytes on the receiver
//! 5. **Correlation**: The response echoes the request id back to the waiter
//!
//! ## Forward Compatibility
//!
//! Unknown JSON fields are ignored on decode so newer peers can add fields
//! without breaking older ones. Numbers decode as their natural JSON type;
//! no integer coercion is applied ahead of validation.

use crate::error::{ErrorObject, IpcError, Result};
use crate::utils::current_timestamp_secs;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A single request datagram
///
/// Immutable after construction: the builder-style `with_*` methods consume
/// and return the value, and nothing mutates a request once it has been
/// handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Globally unique request identifier (UUID v4, 36 characters)
    pub id: String,

    /// Logical namespace grouping related requests on one socket
    pub channel_id: String,

    /// Operation name resolved against the server's handler registry
    pub request: String,

    /// Dynamic JSON arguments; absent when the operation takes none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,

    /// Absolute path of the reply datagram socket
    ///
    /// Absence means fire-and-forget: the server produces no response
    /// datagram at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// Requested handler timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,

    /// Seconds since the Unix epoch at construction time
    pub timestamp: f64,
}

impl Request {
    /// Create a new request with a fresh UUID and the current timestamp
    pub fn new(
        channel_id: impl Into<String>,
        request: impl Into<String>,
        args: Option<Map<String, Value>>,
        timeout: Option<f64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel_id: channel_id.into(),
            request: request.into(),
            args,
            reply_to: None,
            timeout,
            timestamp: current_timestamp_secs(),
        }
    }

    /// Attach the reply socket path, turning this into a tracked request
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Whether the sender expects a response datagram
    pub fn is_expecting_reply(&self) -> bool {
        self.reply_to.is_some()
    }

    /// Serialize the request to JSON bytes for transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| IpcError::InternalError(format!(
            "failed to encode request: {e}"
        )))
    }

    /// Deserialize a request from received JSON bytes
    ///
    /// The two failure modes carry distinct codes: bytes that are not
    /// JSON at all are a `ParseError`, while well-formed JSON that is
    /// missing or mistypes a required field (`id`, `channel_id`,
    /// `request`, `timestamp`) is an `InvalidRequest`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| IpcError::ParseError(format!("invalid request JSON: {e}")))?;
        serde_json::from_value(value)
            .map_err(|e| IpcError::InvalidRequest(format!("malformed request: {e}")))
    }

    /// Serialized size in bytes, used for size-limit checks before send
    pub fn encoded_len(&self) -> Result<usize> {
        Ok(self.to_bytes()?.len())
    }
}

/// A single response datagram
///
/// Exactly one of `result` / `error` is present, matching the `success`
/// flag. The constructors are the only way this crate builds responses, so
/// the invariant holds for every response it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Echo of the originating request's id
    pub request_id: String,

    /// Echo of the originating request's channel
    pub channel_id: String,

    /// Whether the handler completed successfully
    pub success: bool,

    /// Handler result value; present iff `success`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error detail; present iff not `success`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,

    /// Seconds since the Unix epoch at construction time
    pub timestamp: f64,
}

impl Response {
    /// Create a success response carrying a result value
    pub fn success(
        request_id: impl Into<String>,
        channel_id: impl Into<String>,
        result: Value,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            channel_id: channel_id.into(),
            success: true,
            result: Some(result),
            error: None,
            timestamp: current_timestamp_secs(),
        }
    }

    /// Create an error response carrying a typed error object
    pub fn error(
        request_id: impl Into<String>,
        channel_id: impl Into<String>,
        error: ErrorObject,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            channel_id: channel_id.into(),
            success: false,
            result: None,
            error: Some(error),
            timestamp: current_timestamp_secs(),
        }
    }

    /// Whether this response reports success
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Serialize the response to JSON bytes for transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| IpcError::InternalError(format!(
            "failed to encode response: {e}"
        )))
    }

    /// Deserialize a response from received JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| IpcError::ParseError(format!("invalid response JSON: {e}")))
    }
}
