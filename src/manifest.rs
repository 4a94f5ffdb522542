//! # Manifest Model Module
//!
//! The manifest is the schema document describing what a service exposes:
//! channels, the requests on each channel, the arguments each request takes,
//! and reusable argument models. It is parsed from JSON or YAML, validated
//! structurally, and then used to validate argument sets on both the client
//! send path and the server dispatch path.
//!
//! ## Document Shape
//!
//! ```text
//! Manifest
//! ├── version, name, description
//! ├── channels: { channel-id → ChannelSpec }
//! │   └── requests: { request-name → RequestSpec }
//! │       ├── args: { arg-name → ArgumentSpec }
//! │       ├── response: ResponseSpec
//! │       └── error_codes: [string]
//! └── models: { model-name → ArgumentSpec }   (reused via "$ref")
//! ```
//!
//! ## Validation Modes
//!
//! - **Schema validation** (`validate`): traverses the tree and reports the
//!   first blocking error with a dotted pointer to the offending subpath
//! - **Argument validation** (`validate_args`): strict type matching with a
//!   single permitted numeric widening, whole-string patterns, length and
//!   range bounds, enums by value equality, one-level `$ref` resolution

use crate::error::{IpcError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

/// Declared type of a manifest argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    /// UTF-8 string value
    String,
    /// Whole-number value
    Integer,
    /// Any numeric value
    Number,
    /// true / false
    Boolean,
    /// JSON array
    Array,
    /// JSON object
    Object,
    /// JSON null
    Null,
}

impl ArgType {
    /// Lowercase name as written in manifest documents
    pub fn name(&self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Integer => "integer",
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
            ArgType::Array => "array",
            ArgType::Object => "object",
            ArgType::Null => "null",
        }
    }
}

impl std::fmt::Display for ArgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Specification of one argument (or one reusable model)
///
/// Constraint fields apply according to the declared type: pattern and
/// length bounds to strings, minimum/maximum to numerics, enums to any
/// type. A spec may instead reference a named model via `$ref`, in which
/// case the referenced spec is used and local constraint fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    /// Declared value type
    #[serde(rename = "type")]
    pub arg_type: ArgType,

    /// Whether the argument must be present
    #[serde(default)]
    pub required: bool,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whole-string regular expression constraint (strings only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Minimum string length in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    /// Maximum string length in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    /// Inclusive numeric lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    /// Inclusive numeric upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    /// Closed set of permitted values, compared by value equality
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    /// Default applied by the server when the argument is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Reference to a named model in the manifest's `models` table
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub model_ref: Option<String>,
}

impl ArgumentSpec {
    /// Minimal spec of the given type, used heavily in tests
    pub fn of_type(arg_type: ArgType) -> Self {
        Self {
            arg_type,
            required: false,
            description: None,
            pattern: None,
            min_length: None,
            max_length: None,
            minimum: None,
            maximum: None,
            enum_values: None,
            default: None,
            model_ref: None,
        }
    }

    /// Same spec with `required` set
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Declared shape of a request's success result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpec {
    /// Declared result type
    #[serde(rename = "type")]
    pub value_type: ArgType,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Specification of one request on a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Argument name → specification
    #[serde(default)]
    pub args: HashMap<String, ArgumentSpec>,

    /// Declared success-result shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSpec>,

    /// Error code names this request may return
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_codes: Vec<String>,
}

/// Specification of one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Request name → specification
    #[serde(default)]
    pub requests: HashMap<String, RequestSpec>,
}

/// In-memory manifest document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Document version string; must be non-empty
    pub version: String,

    /// Service display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Service description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Channel id → channel specification
    #[serde(default)]
    pub channels: HashMap<String, ChannelSpec>,

    /// Reusable named argument models
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub models: HashMap<String, ArgumentSpec>,
}

impl Manifest {
    /// Parse a manifest from a JSON document and validate its schema
    pub fn from_json(text: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(text).map_err(|e| {
            IpcError::ManifestValidationError {
                path: String::new(),
                message: format!("invalid manifest JSON: {e}"),
            }
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse a manifest from a YAML document and validate its schema
    pub fn from_yaml(text: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(text).map_err(|e| {
            IpcError::ManifestValidationError {
                path: String::new(),
                message: format!("invalid manifest YAML: {e}"),
            }
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a manifest from disk, dispatching on file extension
    ///
    /// `.json` parses as JSON; `.yaml` / `.yml` parse as YAML; anything else
    /// is a manifest validation error naming the extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            Some("yaml") | Some("yml") => Self::from_yaml(&text),
            other => Err(IpcError::ManifestValidationError {
                path: String::new(),
                message: format!(
                    "unsupported manifest extension {:?}; expected json, yaml, or yml",
                    other.unwrap_or("")
                ),
            }),
        }
    }

    /// Serialize the manifest back to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| IpcError::InternalError(format!("failed to encode manifest: {e}")))
    }

    /// Serialize the manifest back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| IpcError::InternalError(format!("failed to encode manifest: {e}")))
    }

    /// Validate the manifest schema
    ///
    /// Traverses the tree and returns the first blocking error with a
    /// dotted pointer to the offending subpath, e.g.
    /// `channels.library.requests.lookup.args.isbn`.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(schema_error("version", "version must be non-empty"));
        }

        if self.channels.is_empty() {
            return Err(schema_error("channels", "manifest must define at least one channel"));
        }

        for (channel_id, channel) in &self.channels {
            let channel_path = format!("channels.{channel_id}");
            if channel_id.trim().is_empty() {
                return Err(schema_error(&channel_path, "channel id must be non-empty"));
            }

            for (request_name, request) in &channel.requests {
                let request_path = format!("{channel_path}.requests.{request_name}");
                if request_name.trim().is_empty() {
                    return Err(schema_error(&request_path, "request name must be non-empty"));
                }

                for (arg_name, arg) in &request.args {
                    let arg_path = format!("{request_path}.args.{arg_name}");
                    if arg_name.trim().is_empty() {
                        return Err(schema_error(&arg_path, "argument name must be non-empty"));
                    }
                    self.validate_argument_spec(&arg_path, arg)?;
                }
            }
        }

        for (model_name, model) in &self.models {
            let model_path = format!("models.{model_name}");
            if model_name.trim().is_empty() {
                return Err(schema_error(&model_path, "model name must be non-empty"));
            }
            self.validate_argument_spec(&model_path, model)?;
        }

        Ok(())
    }

    /// Schema checks for one argument spec
    fn validate_argument_spec(&self, path: &str, spec: &ArgumentSpec) -> Result<()> {
        if let Some(ref model_ref) = spec.model_ref {
            if !self.models.contains_key(model_ref) {
                return Err(schema_error(
                    path,
                    &format!("$ref '{model_ref}' does not name a model"),
                ));
            }
            // Constraints live on the referenced model; nothing further to
            // check on the referencing spec.
            return Ok(());
        }

        if let Some(ref pattern) = spec.pattern {
            if let Err(e) = Regex::new(pattern) {
                return Err(schema_error(path, &format!("pattern does not compile: {e}")));
            }
        }

        if let (Some(min), Some(max)) = (spec.min_length, spec.max_length) {
            if min > max {
                return Err(schema_error(path, "min_length exceeds max_length"));
            }
        }

        if let (Some(min), Some(max)) = (spec.minimum, spec.maximum) {
            if min > max {
                return Err(schema_error(path, "minimum exceeds maximum"));
            }
        }

        if let Some(ref values) = spec.enum_values {
            if values.is_empty() {
                return Err(schema_error(path, "enum must not be empty"));
            }
            for value in values {
                if !value_matches_type(value, spec.arg_type) {
                    return Err(schema_error(
                        path,
                        &format!("enum value {value} does not conform to type '{}'", spec.arg_type),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Merge another manifest into this one
    ///
    /// Channels and models must be disjoint; a duplicate channel id or
    /// model name is an error and leaves `self` unchanged.
    pub fn merge(&mut self, other: Manifest) -> Result<()> {
        for channel_id in other.channels.keys() {
            if self.channels.contains_key(channel_id) {
                return Err(IpcError::ManifestValidationError {
                    path: format!("channels.{channel_id}"),
                    message: "duplicate channel id in merge".to_string(),
                });
            }
        }
        for model_name in other.models.keys() {
            if self.models.contains_key(model_name) {
                return Err(IpcError::ManifestValidationError {
                    path: format!("models.{model_name}"),
                    message: "duplicate model name in merge".to_string(),
                });
            }
        }

        self.channels.extend(other.channels);
        self.models.extend(other.models);
        Ok(())
    }

    /// Look up a channel spec
    pub fn channel(&self, channel_id: &str) -> Option<&ChannelSpec> {
        self.channels.get(channel_id)
    }

    /// Look up a request spec on a channel
    pub fn request_spec(&self, channel_id: &str, request_name: &str) -> Option<&RequestSpec> {
        self.channels
            .get(channel_id)
            .and_then(|c| c.requests.get(request_name))
    }

    /// Resolve a spec's `$ref` to the underlying model, one level deep
    fn resolve<'a>(&'a self, spec: &'a ArgumentSpec) -> Result<&'a ArgumentSpec> {
        match spec.model_ref {
            Some(ref name) => self.models.get(name).ok_or_else(|| {
                IpcError::ValidationFailed(format!("$ref '{name}' does not name a model"))
            }),
            None => Ok(spec),
        }
    }

    /// Validate a handler's success value against the declared response
    ///
    /// A request with no `response` declaration accepts any value. The
    /// server runs this after a handler completes; a mismatch means the
    /// handler, not the caller, is at fault.
    pub fn validate_response(
        &self,
        channel_id: &str,
        request_name: &str,
        value: &Value,
    ) -> Result<()> {
        let Some(spec) = self.request_spec(channel_id, request_name) else {
            return Ok(());
        };
        let Some(ref response) = spec.response else {
            return Ok(());
        };

        if !value_matches_type(value, response.value_type) {
            return Err(IpcError::ValidationFailed(format!(
                "result of '{request_name}' must be of type '{}'",
                response.value_type
            )));
        }
        Ok(())
    }

    /// Fill in declared defaults for arguments absent from `args`
    ///
    /// Only inserts; never overwrites a caller-supplied value. The server
    /// applies this before dispatching to a handler.
    pub fn apply_defaults(
        &self,
        channel_id: &str,
        request_name: &str,
        args: &mut Map<String, Value>,
    ) {
        if let Some(spec) = self.request_spec(channel_id, request_name) {
            for (name, arg_spec) in &spec.args {
                if !args.contains_key(name) {
                    if let Some(ref default) = arg_spec.default {
                        args.insert(name.clone(), default.clone());
                    }
                }
            }
        }
    }

    /// Validate an argument map against a request spec
    ///
    /// ## Checks
    ///
    /// - The channel and request exist in the manifest
    /// - No unknown argument names
    /// - All `required` arguments present
    /// - Per-value type, pattern, length, range, and enum constraints
    ///
    /// Unknown channel or request is a `ValidationFailed`; any argument
    /// mismatch is an `InvalidParams`, matching the codes the server puts
    /// on the wire.
    pub fn validate_args(
        &self,
        channel_id: &str,
        request_name: &str,
        args: &Map<String, Value>,
    ) -> Result<()> {
        let spec = self.request_spec(channel_id, request_name).ok_or_else(|| {
            IpcError::ValidationFailed(format!(
                "manifest does not define request '{request_name}' on channel '{channel_id}'"
            ))
        })?;

        for name in args.keys() {
            if !spec.args.contains_key(name) {
                return Err(IpcError::InvalidParams(format!(
                    "unknown argument '{name}' for request '{request_name}'"
                )));
            }
        }

        for (name, arg_spec) in &spec.args {
            let resolved = self.resolve(arg_spec)?;
            match args.get(name) {
                Some(value) => validate_value(name, value, resolved)?,
                None => {
                    // `required` lives on the referencing spec so a shared
                    // model can be optional in one request and mandatory in
                    // another.
                    if arg_spec.required {
                        return Err(IpcError::InvalidParams(format!(
                            "missing required argument '{name}' for request '{request_name}'"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

fn schema_error(path: &str, message: &str) -> IpcError {
    IpcError::ManifestValidationError {
        path: path.to_string(),
        message: message.to_string(),
    }
}

/// Strict type match with the one permitted numeric widening
///
/// An integer value satisfies a `number` spec; a whole-valued float
/// satisfies an `integer` spec only when it has no fractional part.
fn value_matches_type(value: &Value, arg_type: ArgType) -> bool {
    match arg_type {
        ArgType::String => value.is_string(),
        ArgType::Integer => {
            if value.is_i64() || value.is_u64() {
                true
            } else if let Some(f) = value.as_f64() {
                f.fract() == 0.0
            } else {
                false
            }
        }
        ArgType::Number => value.is_number(),
        ArgType::Boolean => value.is_boolean(),
        ArgType::Array => value.is_array(),
        ArgType::Object => value.is_object(),
        ArgType::Null => value.is_null(),
    }
}

/// Apply every constraint on one argument value
fn validate_value(name: &str, value: &Value, spec: &ArgumentSpec) -> Result<()> {
    if !value_matches_type(value, spec.arg_type) {
        return Err(IpcError::InvalidParams(format!(
            "argument '{name}' must be of type '{}'",
            spec.arg_type
        )));
    }

    if let Some(ref values) = spec.enum_values {
        if !values.contains(value) {
            return Err(IpcError::InvalidParams(format!(
                "argument '{name}' is not one of the permitted enum values"
            )));
        }
    }

    if let Some(s) = value.as_str() {
        let char_len = s.chars().count();
        if let Some(min) = spec.min_length {
            if char_len < min {
                return Err(IpcError::InvalidParams(format!(
                    "argument '{name}' is shorter than min_length {min}"
                )));
            }
        }
        if let Some(max) = spec.max_length {
            if char_len > max {
                return Err(IpcError::InvalidParams(format!(
                    "argument '{name}' is longer than max_length {max}"
                )));
            }
        }
        if let Some(ref pattern) = spec.pattern {
            // Whole-string matching: the pattern is anchored on both ends
            // regardless of how it was written.
            let anchored = format!("^(?:{pattern})$");
            let re = Regex::new(&anchored).map_err(|e| {
                IpcError::ValidationFailed(format!("pattern for '{name}' does not compile: {e}"))
            })?;
            if !re.is_match(s) {
                return Err(IpcError::InvalidParams(format!(
                    "argument '{name}' does not match the required pattern"
                )));
            }
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(minimum) = spec.minimum {
            if n < minimum {
                return Err(IpcError::InvalidParams(format!(
                    "argument '{name}' is below the minimum of {minimum}"
                )));
            }
        }
        if let Some(maximum) = spec.maximum {
            if n > maximum {
                return Err(IpcError::InvalidParams(format!(
                    "argument '{name}' is above the maximum of {maximum}"
                )));
            }
        }
    }

    Ok(())
}
