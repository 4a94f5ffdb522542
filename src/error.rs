//! # Error Taxonomy Module
//!
//! This module defines the typed error surface shared by every component of
//! the IPC layer. Numeric codes follow JSON-RPC 2.0 conventions with an
//! extension range for conditions specific to this transport (security
//! violations, handler timeouts, framing errors, and correlation anomalies).
//!
//! ## Error Flow
//!
//! ```
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────────┐
//! │   IpcError   │───▶│ ErrorObject  │───▶│ Response{error}  │
//! │ (in-process) │    │ (wire shape) │    │   (datagram)     │
//! └──────────────┘    └──────────────┘    └──────────────────┘
//! ```
//!
//! Library code raises `IpcError`; anything that crosses the socket is first
//! converted to an `ErrorObject` carrying the numeric code, a human-readable
//! message, and optional structured data. Messages never include secret
//! paths or internal stack detail.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// JSON-RPC 2.0 standard error code: received bytes were not a JSON object
pub const PARSE_ERROR: i32 = -32700;
/// JSON-RPC 2.0 standard error code: required Request fields were missing
pub const INVALID_REQUEST: i32 = -32600;
/// JSON-RPC 2.0 standard error code: no handler registered for the request
pub const METHOD_NOT_FOUND: i32 = -32601;
/// JSON-RPC 2.0 standard error code: argument validation failed
pub const INVALID_PARAMS: i32 = -32602;
/// JSON-RPC 2.0 standard error code: handler faulted unexpectedly
pub const INTERNAL_ERROR: i32 = -32603;
/// Extension code: manifest-level validation failed
pub const VALIDATION_FAILED: i32 = -32001;
/// Extension code: handler exceeded its deadline
pub const HANDLER_TIMEOUT: i32 = -32002;
/// Extension code: security validator rejected input
pub const SECURITY_VIOLATION: i32 = -32003;
/// Extension code: length-prefix codec rejected input
pub const MESSAGE_FRAMING_ERROR: i32 = -32004;
/// Extension code: correlation table anomaly
pub const RESPONSE_TRACKING_ERROR: i32 = -32005;
/// Extension code: manifest schema rejected
pub const MANIFEST_VALIDATION_ERROR: i32 = -32006;

/// Classification of a security validator rejection
///
/// Each variant names the specific rule that was violated so callers can
/// distinguish, for example, an over-long socket path from a traversal
/// attempt without string-matching error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityViolationKind {
    /// Socket path is not absolute
    PathNotAbsolute,
    /// Socket path exceeds the 108-byte `sun_path` limit
    PathTooLong,
    /// Socket path contains a `..` component or escapes its root
    PathTraversal,
    /// Socket path does not reside under an allowed root directory
    PathOutsideAllowedRoots,
    /// Input contains an embedded NUL byte
    NulByte,
    /// Identifier is empty, too long, or contains forbidden characters
    BadIdentifier,
    /// Message exceeds the configured maximum size
    MessageTooLarge,
    /// Message bytes are not valid UTF-8
    NotUtf8,
    /// Message parsed but is not a JSON object
    NotAJsonObject,
    /// Argument payload exceeds the configured maximum size
    ArgsTooLarge,
}

impl SecurityViolationKind {
    /// Short machine-readable label used in error data payloads
    pub fn label(&self) -> &'static str {
        match self {
            SecurityViolationKind::PathNotAbsolute => "path_not_absolute",
            SecurityViolationKind::PathTooLong => "path_too_long",
            SecurityViolationKind::PathTraversal => "path_traversal",
            SecurityViolationKind::PathOutsideAllowedRoots => "path_outside_allowed_roots",
            SecurityViolationKind::NulByte => "nul_byte",
            SecurityViolationKind::BadIdentifier => "bad_identifier",
            SecurityViolationKind::MessageTooLarge => "message_too_large",
            SecurityViolationKind::NotUtf8 => "not_utf8",
            SecurityViolationKind::NotAJsonObject => "not_a_json_object",
            SecurityViolationKind::ArgsTooLarge => "args_too_large",
        }
    }
}

impl std::fmt::Display for SecurityViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Typed error for every failure the IPC layer can produce
///
/// The taxonomy mirrors JSON-RPC 2.0 plus an extension range. Every variant
/// maps to a stable numeric code via [`IpcError::code`], and any variant can
/// be converted to the wire-level [`ErrorObject`] for inclusion in an error
/// `Response`.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Received bytes could not be parsed as a JSON object
    #[error("parse error: {0}")]
    ParseError(String),

    /// A request was missing required fields or malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No handler is registered for the named request
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Argument validation against the request spec failed
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A handler faulted unexpectedly or an internal invariant broke
    #[error("internal error: {0}")]
    InternalError(String),

    /// Manifest-level validation of a request failed
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// A handler exceeded its execution deadline
    #[error("handler timed out after {timeout_secs}s")]
    HandlerTimeout {
        /// The deadline the handler exceeded, in seconds
        timeout_secs: f64,
    },

    /// The security validator rejected externally supplied input
    #[error("security violation ({kind}): {message}")]
    SecurityViolation {
        /// Which rule was violated
        kind: SecurityViolationKind,
        /// Human-readable detail, sanitized of secret paths
        message: String,
    },

    /// The length-prefix codec rejected a frame
    #[error("message framing error: {0}")]
    MessageFramingError(String),

    /// The correlation table observed an anomaly (unknown or duplicate id)
    #[error("response tracking error: {0}")]
    ResponseTrackingError(String),

    /// A manifest document failed schema validation
    #[error("manifest validation error at {path}: {message}")]
    ManifestValidationError {
        /// Dotted subpath of the offending manifest node
        path: String,
        /// What was wrong at that node
        message: String,
    },

    /// A datagram exceeded the kernel per-datagram limit
    #[error("payload of {size} bytes exceeds datagram limit of {limit} bytes")]
    PayloadTooLarge {
        /// Size of the rejected payload
        size: usize,
        /// Effective per-datagram limit
        limit: usize,
    },

    /// The request timed out waiting for a response
    #[error("request timed out after {timeout_secs}s")]
    RequestTimeout {
        /// How long the caller waited, in seconds
        timeout_secs: f64,
    },

    /// The request was cancelled before completion
    #[error("request cancelled: {reason}")]
    Cancelled {
        /// Caller-supplied cancellation reason
        reason: String,
    },

    /// An underlying socket operation failed
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl IpcError {
    /// Numeric JSON-RPC code for this error
    ///
    /// Transport-surface conditions that have no code of their own map into
    /// the closest taxonomy entry: oversized payloads report as framing
    /// errors, local timeouts and cancellations as handler timeouts and
    /// internal errors respectively, and socket failures as internal errors.
    pub fn code(&self) -> i32 {
        match self {
            IpcError::ParseError(_) => PARSE_ERROR,
            IpcError::InvalidRequest(_) => INVALID_REQUEST,
            IpcError::MethodNotFound(_) => METHOD_NOT_FOUND,
            IpcError::InvalidParams(_) => INVALID_PARAMS,
            IpcError::InternalError(_) => INTERNAL_ERROR,
            IpcError::ValidationFailed(_) => VALIDATION_FAILED,
            IpcError::HandlerTimeout { .. } => HANDLER_TIMEOUT,
            IpcError::SecurityViolation { .. } => SECURITY_VIOLATION,
            IpcError::MessageFramingError(_) => MESSAGE_FRAMING_ERROR,
            IpcError::ResponseTrackingError(_) => RESPONSE_TRACKING_ERROR,
            IpcError::ManifestValidationError { .. } => MANIFEST_VALIDATION_ERROR,
            IpcError::PayloadTooLarge { .. } => MESSAGE_FRAMING_ERROR,
            IpcError::RequestTimeout { .. } => HANDLER_TIMEOUT,
            IpcError::Cancelled { .. } => INTERNAL_ERROR,
            IpcError::Transport(_) => INTERNAL_ERROR,
        }
    }

    /// Convenience constructor for a security violation
    pub fn security(kind: SecurityViolationKind, message: impl Into<String>) -> Self {
        IpcError::SecurityViolation {
            kind,
            message: message.into(),
        }
    }

    /// Convert to the wire-level error shape
    ///
    /// Structured data is attached where a variant carries detail worth
    /// machine processing (the security violation kind, timeout values).
    pub fn to_error_object(&self) -> ErrorObject {
        let data = match self {
            IpcError::SecurityViolation { kind, .. } => Some(serde_json::json!({
                "violation": kind.label(),
            })),
            IpcError::HandlerTimeout { timeout_secs } => Some(serde_json::json!({
                "timeout": timeout_secs,
            })),
            IpcError::PayloadTooLarge { size, limit } => Some(serde_json::json!({
                "size": size,
                "limit": limit,
            })),
            IpcError::ManifestValidationError { path, .. } => Some(serde_json::json!({
                "path": path,
            })),
            _ => None,
        };

        ErrorObject {
            code: self.code(),
            message: self.to_string(),
            data,
        }
    }
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, IpcError>;

/// Wire representation of an error inside a `Response`
///
/// Field-for-field JSON mapping: `{"code": <int>, "message": "<str>",
/// "data": <any>?}`. The `data` member is omitted when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric JSON-RPC error code
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Optional structured detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Create an error object with no structured data
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error object with attached structured data
    pub fn with_data(code: i32, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<IpcError> for ErrorObject {
    fn from(err: IpcError) -> Self {
        err.to_error_object()
    }
}
