//! # Security Validator Module
//!
//! Every externally supplied string is validated here before it crosses a
//! process boundary: socket paths before binding or sending, channel and
//! request identifiers before dispatch, and message payloads before parsing.
//!
//! ## Validation Categories
//!
//! - **Socket paths**: absolute, NUL-free, within the `sun_path` byte limit,
//!   confined to a small set of allowed root directories, traversal-free
//! - **Identifiers**: channel ids, request names, and argument names are
//!   restricted to a conservative character set with no shell metacharacters
//! - **Message payloads**: valid UTF-8, bounded size, JSON object at the top
//! - **Argument sets**: name rules plus a total-size ceiling
//!
//! ## Failure Mode
//!
//! All rejections are `IpcError::SecurityViolation` carrying a
//! [`SecurityViolationKind`] so callers can branch on the rule that fired
//! without parsing messages. Violations are never retried and never surface
//! as success.

use crate::error::{IpcError, Result, SecurityViolationKind};
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};

/// Capacity of `sockaddr_un.sun_path` on Linux
///
/// A bound socket path must fit in this many bytes; the kernel rejects
/// longer paths at bind time, so we fail fast with a typed error instead.
pub const MAX_SOCKET_PATH_BYTES: usize = 108;

/// Default ceiling for a single message, request or response
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Hard floor for the configurable message size limit
pub const MIN_MESSAGE_SIZE_LIMIT: usize = 1024;

/// Hard ceiling for the configurable message size limit
pub const MAX_MESSAGE_SIZE_LIMIT: usize = 64 * 1024 * 1024;

/// Default ceiling for the serialized argument map of one request
pub const DEFAULT_MAX_ARGS_SIZE: usize = 5 * 1024 * 1024;

/// Default ceiling for identifier length
pub const DEFAULT_MAX_IDENTIFIER_LENGTH: usize = 256;

/// Characters that terminate identifier validation immediately
///
/// Shell metacharacters are rejected wholesale even though the allowed
/// character set would exclude them anyway; checking them explicitly keeps
/// the rejection reason precise in logs and error data.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '|', '&', '`', '$', '(', ')', '\n', '\r', '\t',
];

/// Tunable limits applied by the validator
///
/// The same limits object is shared by client and server so both sides of a
/// connection agree on what is acceptable. Limits outside their supported
/// range are clamped, not rejected.
#[derive(Debug, Clone)]
pub struct SecurityLimits {
    /// Maximum identifier length in characters
    pub max_identifier_length: usize,

    /// Maximum message size in bytes
    ///
    /// Clamped to [`MIN_MESSAGE_SIZE_LIMIT`]..=[`MAX_MESSAGE_SIZE_LIMIT`]
    /// when the validator is constructed.
    pub max_message_size: usize,

    /// Maximum serialized size of one request's argument map
    pub max_args_size: usize,

    /// Directories a socket path may live under
    ///
    /// Paths are normalized before the prefix check, so `/tmp/../etc` does
    /// not pass as `/tmp/`-rooted.
    pub allowed_roots: Vec<PathBuf>,
}

impl Default for SecurityLimits {
    fn default() -> Self {
        Self {
            max_identifier_length: DEFAULT_MAX_IDENTIFIER_LENGTH,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_args_size: DEFAULT_MAX_ARGS_SIZE,
            allowed_roots: vec![
                PathBuf::from("/tmp"),
                PathBuf::from("/var/run"),
                PathBuf::from("/var/tmp"),
            ],
        }
    }
}

/// Validator applying [`SecurityLimits`] to externally supplied input
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    limits: SecurityLimits,
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new(SecurityLimits::default())
    }
}

impl SecurityValidator {
    /// Create a validator, clamping the message size limit into range
    pub fn new(mut limits: SecurityLimits) -> Self {
        limits.max_message_size = limits
            .max_message_size
            .clamp(MIN_MESSAGE_SIZE_LIMIT, MAX_MESSAGE_SIZE_LIMIT);
        Self { limits }
    }

    /// The limits this validator enforces
    pub fn limits(&self) -> &SecurityLimits {
        &self.limits
    }

    /// Effective maximum message size after clamping
    pub fn max_message_size(&self) -> usize {
        self.limits.max_message_size
    }

    /// Validate a Unix socket path before bind or send
    ///
    /// ## Rules
    ///
    /// - Absolute path
    /// - No embedded NUL bytes
    /// - At most [`MAX_SOCKET_PATH_BYTES`] bytes (the `sun_path` limit)
    /// - No `..` components and no normalization that escapes the root
    /// - Normalized path must live under one of the allowed roots
    ///
    /// The normalization is lexical: reply sockets are validated before they
    /// exist on disk, so filesystem canonicalization is not an option here.
    pub fn validate_socket_path(&self, path: &str) -> Result<PathBuf> {
        if path.contains('\0') {
            return Err(IpcError::security(
                SecurityViolationKind::NulByte,
                "socket path contains an embedded NUL byte",
            ));
        }

        let p = Path::new(path);
        if !p.is_absolute() {
            return Err(IpcError::security(
                SecurityViolationKind::PathNotAbsolute,
                format!("socket path must be absolute, got '{path}'"),
            ));
        }

        if path.len() > MAX_SOCKET_PATH_BYTES {
            return Err(IpcError::security(
                SecurityViolationKind::PathTooLong,
                format!(
                    "socket path is {} bytes, limit is {} bytes",
                    path.len(),
                    MAX_SOCKET_PATH_BYTES
                ),
            ));
        }

        let normalized = normalize_lexically(p)?;

        let allowed = self
            .limits
            .allowed_roots
            .iter()
            .any(|root| normalized.starts_with(root));
        if !allowed {
            return Err(IpcError::security(
                SecurityViolationKind::PathOutsideAllowedRoots,
                "socket path is outside the allowed socket directories",
            ));
        }

        Ok(normalized)
    }

    /// Validate a channel id, request name, or argument name
    ///
    /// Identifiers are non-empty, bounded in length, and restricted to
    /// `[A-Za-z0-9_-]`. Control characters, whitespace, and shell
    /// metacharacters are rejected with a specific reason.
    pub fn validate_identifier(&self, value: &str, what: &str) -> Result<()> {
        if value.is_empty() {
            return Err(IpcError::security(
                SecurityViolationKind::BadIdentifier,
                format!("{what} must not be empty"),
            ));
        }

        if value.len() > self.limits.max_identifier_length {
            return Err(IpcError::security(
                SecurityViolationKind::BadIdentifier,
                format!(
                    "{what} is {} characters, limit is {}",
                    value.len(),
                    self.limits.max_identifier_length
                ),
            ));
        }

        if value.contains('\0') {
            return Err(IpcError::security(
                SecurityViolationKind::NulByte,
                format!("{what} contains an embedded NUL byte"),
            ));
        }

        for ch in value.chars() {
            if SHELL_METACHARACTERS.contains(&ch) {
                return Err(IpcError::security(
                    SecurityViolationKind::BadIdentifier,
                    format!("{what} contains shell metacharacter {ch:?}"),
                ));
            }
            if ch.is_control() {
                return Err(IpcError::security(
                    SecurityViolationKind::BadIdentifier,
                    format!("{what} contains a control character"),
                ));
            }
            if ch.is_whitespace() {
                return Err(IpcError::security(
                    SecurityViolationKind::BadIdentifier,
                    format!("{what} contains whitespace"),
                ));
            }
            if !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '-') {
                return Err(IpcError::security(
                    SecurityViolationKind::BadIdentifier,
                    format!("{what} contains forbidden character {ch:?}"),
                ));
            }
        }

        Ok(())
    }

    /// Validate raw message bytes before they are parsed as a `Request` or
    /// `Response`
    ///
    /// Checks size, UTF-8 validity, and that the top-level JSON value is an
    /// object. The size check runs first so an oversized buffer is rejected
    /// without paying for UTF-8 validation.
    pub fn validate_message_bytes(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.limits.max_message_size {
            return Err(IpcError::security(
                SecurityViolationKind::MessageTooLarge,
                format!(
                    "message is {} bytes, limit is {} bytes",
                    bytes.len(),
                    self.limits.max_message_size
                ),
            ));
        }

        let text = std::str::from_utf8(bytes).map_err(|_| {
            IpcError::security(
                SecurityViolationKind::NotUtf8,
                "message bytes are not valid UTF-8",
            )
        })?;

        let value: Value = serde_json::from_str(text).map_err(|e| {
            IpcError::security(
                SecurityViolationKind::NotAJsonObject,
                format!("message is not valid JSON: {e}"),
            )
        })?;

        if !value.is_object() {
            return Err(IpcError::security(
                SecurityViolationKind::NotAJsonObject,
                "message top-level JSON value is not an object",
            ));
        }

        Ok(())
    }

    /// Validate the names and gross shape of an argument map
    ///
    /// Argument *names* follow identifier rules; string *values* are scanned
    /// for embedded NUL bytes; the serialized map must fit under the
    /// configured args-size ceiling. Type checking against a `RequestSpec`
    /// is the manifest module's job, not this one's.
    pub fn validate_args(&self, args: &Map<String, Value>) -> Result<()> {
        for (name, value) in args {
            self.validate_identifier(name, "argument name")?;
            scan_value_for_nul(name, value)?;
        }

        let serialized_len = serde_json::to_vec(args)
            .map(|v| v.len())
            .unwrap_or(usize::MAX);
        if serialized_len > self.limits.max_args_size {
            return Err(IpcError::security(
                SecurityViolationKind::ArgsTooLarge,
                format!(
                    "arguments serialize to {} bytes, limit is {} bytes",
                    serialized_len, self.limits.max_args_size
                ),
            ));
        }

        Ok(())
    }
}

/// Reject string values containing NUL anywhere in a JSON tree
fn scan_value_for_nul(name: &str, value: &Value) -> Result<()> {
    match value {
        Value::String(s) => {
            if s.contains('\0') {
                return Err(IpcError::security(
                    SecurityViolationKind::NulByte,
                    format!("argument '{name}' contains an embedded NUL byte"),
                ));
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                scan_value_for_nul(name, item)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for item in map.values() {
                scan_value_for_nul(name, item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Normalize a path without touching the filesystem
///
/// `.` components are dropped; any `..` component is a traversal error, not
/// something to resolve. Reply sockets do not exist at validation time, so
/// this must stay purely lexical.
fn normalize_lexically(path: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir => normalized.push("/"),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(IpcError::security(
                    SecurityViolationKind::PathTraversal,
                    "socket path contains a '..' component",
                ));
            }
            Component::Normal(part) => normalized.push(part),
            Component::Prefix(_) => {
                // Windows-only component; unreachable on POSIX targets.
                return Err(IpcError::security(
                    SecurityViolationKind::PathNotAbsolute,
                    "socket path has an unsupported prefix component",
                ));
            }
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> SecurityValidator {
        SecurityValidator::default()
    }

    /// Test the identifier boundary forms from the acceptance checklist
    #[test]
    fn test_identifier_boundaries() {
        let v = validator();
        assert!(v.validate_identifier("a", "channel id").is_ok());
        assert!(v.validate_identifier("my-channel_01", "channel id").is_ok());
        assert!(v.validate_identifier("a b", "channel id").is_err());
        assert!(v.validate_identifier("a\u{0}b", "channel id").is_err());
        assert!(v.validate_identifier("../etc", "channel id").is_err());
        assert!(v.validate_identifier("", "channel id").is_err());
        assert!(v.validate_identifier("rm;-rf", "channel id").is_err());
        assert!(v.validate_identifier("a|b", "channel id").is_err());
        assert!(v.validate_identifier("x\ny", "channel id").is_err());
    }

    /// Test that identifier length obeys the configured limit
    #[test]
    fn test_identifier_length_limit() {
        let v = SecurityValidator::new(SecurityLimits {
            max_identifier_length: 8,
            ..Default::default()
        });
        assert!(v.validate_identifier("12345678", "name").is_ok());
        assert!(v.validate_identifier("123456789", "name").is_err());
    }

    /// Test socket path acceptance and the 108-byte boundary
    #[test]
    fn test_socket_path_length_boundary() {
        let v = validator();

        // "/tmp/" is 5 bytes; pad the file name to land exactly on the limit.
        let exact = format!("/tmp/{}", "a".repeat(MAX_SOCKET_PATH_BYTES - 5));
        assert_eq!(exact.len(), MAX_SOCKET_PATH_BYTES);
        assert!(v.validate_socket_path(&exact).is_ok());

        let over = format!("/tmp/{}", "a".repeat(MAX_SOCKET_PATH_BYTES - 4));
        assert_eq!(over.len(), MAX_SOCKET_PATH_BYTES + 1);
        let err = v.validate_socket_path(&over).unwrap_err();
        match err {
            IpcError::SecurityViolation { kind, .. } => {
                assert_eq!(kind, SecurityViolationKind::PathTooLong);
            }
            other => panic!("expected PathTooLong, got {other:?}"),
        }
    }

    /// Test traversal and root confinement rejections
    #[test]
    fn test_socket_path_traversal() {
        let v = validator();
        assert!(v.validate_socket_path("/tmp/../etc/passwd").is_err());
        assert!(v.validate_socket_path("/etc/sock").is_err());
        assert!(v.validate_socket_path("relative/sock").is_err());
        assert!(v.validate_socket_path("/tmp/app\0.sock").is_err());
        assert!(v.validate_socket_path("/tmp/app.sock").is_ok());
        assert!(v.validate_socket_path("/var/run/app.sock").is_ok());
        assert!(v.validate_socket_path("/var/tmp/app.sock").is_ok());
    }

    /// Test that `.` components are tolerated but do not bypass the root check
    #[test]
    fn test_socket_path_normalization() {
        let v = validator();
        let normalized = v.validate_socket_path("/tmp/./nested/app.sock").unwrap();
        assert_eq!(normalized, PathBuf::from("/tmp/nested/app.sock"));
    }

    /// Test message byte validation: size, UTF-8, and object shape
    #[test]
    fn test_message_bytes_rules() {
        let v = SecurityValidator::new(SecurityLimits {
            max_message_size: 1024,
            ..Default::default()
        });

        assert!(v.validate_message_bytes(br#"{"id":"x"}"#).is_ok());
        assert!(v.validate_message_bytes(b"[1,2,3]").is_err());
        assert!(v.validate_message_bytes(b"not json").is_err());
        assert!(v.validate_message_bytes(&[0xff, 0xfe, 0x00]).is_err());

        // At the limit is accepted, one past the limit is rejected. The
        // JSON wrapper {"pad":"..."} adds ten bytes around the padding.
        let padding = "x".repeat(1024 - 10);
        let at_limit = format!(r#"{{"pad":"{padding}"}}"#);
        assert_eq!(at_limit.len(), 1024);
        assert!(v.validate_message_bytes(at_limit.as_bytes()).is_ok());

        let over = "y".repeat(1025);
        assert!(v.validate_message_bytes(over.as_bytes()).is_err());
    }

    /// Test that the message size limit clamps to its floor and ceiling
    #[test]
    fn test_message_size_limit_clamping() {
        let tiny = SecurityValidator::new(SecurityLimits {
            max_message_size: 16,
            ..Default::default()
        });
        assert_eq!(tiny.max_message_size(), MIN_MESSAGE_SIZE_LIMIT);

        let huge = SecurityValidator::new(SecurityLimits {
            max_message_size: usize::MAX,
            ..Default::default()
        });
        assert_eq!(huge.max_message_size(), MAX_MESSAGE_SIZE_LIMIT);
    }

    /// Test the serialized args-size ceiling
    #[test]
    fn test_args_size_ceiling() {
        let v = SecurityValidator::new(SecurityLimits {
            max_args_size: 64,
            ..Default::default()
        });

        let mut small = Map::new();
        small.insert("k".to_string(), json!("v"));
        assert!(v.validate_args(&small).is_ok());

        let mut large = Map::new();
        large.insert("blob".to_string(), json!("x".repeat(128)));
        let err = v.validate_args(&large).unwrap_err();
        match err {
            IpcError::SecurityViolation { kind, .. } => {
                assert_eq!(kind, SecurityViolationKind::ArgsTooLarge);
            }
            other => panic!("expected ArgsTooLarge, got {other:?}"),
        }
    }

    /// Test argument map validation: names, NUL scanning, nesting
    #[test]
    fn test_args_validation() {
        let v = validator();

        let mut args = Map::new();
        args.insert("title".to_string(), json!("clean value"));
        args.insert("count".to_string(), json!(3));
        args.insert("tags".to_string(), json!(["a", "b"]));
        assert!(v.validate_args(&args).is_ok());

        let mut bad_name = Map::new();
        bad_name.insert("bad name".to_string(), json!(1));
        assert!(v.validate_args(&bad_name).is_err());

        let mut nul_value = Map::new();
        nul_value.insert("text".to_string(), json!("a\u{0}b"));
        assert!(v.validate_args(&nul_value).is_err());

        let mut nested_nul = Map::new();
        nested_nul.insert("outer".to_string(), json!({"inner": ["ok", "bad\u{0}"]}));
        assert!(v.validate_args(&nested_nul).is_err());
    }
}
