//! # Command-Line Interface Module
//!
//! Argument parsing and configuration transformation for the reference
//! `dgram-ipc` binary. The binary is a collaborator around the library
//! core: it can host a service (`listen`) or drive one (`send`), and its
//! arguments map directly onto [`ServerConfig`] and [`ClientConfig`].
//!
//! ## Usage Examples
//!
//! ```bash
//! # Host a demo service with a manifest
//! dgram-ipc --mode listen --socket-path /tmp/demo.sock --manifest api.yaml
//!
//! # Call it
//! dgram-ipc --mode send --socket-path /tmp/demo.sock \
//!     --channel demo --request ping
//!
//! # Call with arguments and a tight timeout
//! dgram-ipc --mode send --socket-path /tmp/demo.sock \
//!     --channel demo --request echo --args '{"msg":"hello"}' --timeout 2s
//!
//! # Fire and forget
//! dgram-ipc --mode send --socket-path /tmp/demo.sock \
//!     --channel demo --request log-line --args '{"line":"x"}' --no-response
//! ```

use crate::client::ClientConfig;
use crate::security::SecurityLimits;
use crate::server::ServerConfig;
use anyhow::{anyhow, Context, Result};
use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, ValueEnum,
};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::Duration;

/// Defines the styles for the help message to replicate clap v3's appearance.
fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Operating mode of the reference binary
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Host a service on the socket path
    #[value(name = "listen")]
    Listen,

    /// Send one request to the socket path and print the JSON response
    #[value(name = "send")]
    Send,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Listen => write!(f, "listen"),
            Mode::Send => write!(f, "send"),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Operating mode: host a service or send a request
    #[arg(short = 'm', long, value_enum, default_value_t = Mode::Send, help_heading = "Core Options")]
    pub mode: Mode,

    /// Path of the well-known datagram socket
    ///
    /// Must be absolute and under an allowed socket directory
    /// (/tmp, /var/run, /var/tmp). The listen mode binds it; the send
    /// mode addresses datagrams to it.
    #[arg(short = 's', long, default_value = "/tmp/dgram_ipc.sock", help_heading = "Core Options")]
    pub socket_path: String,

    /// Manifest file (JSON or YAML) for argument validation
    ///
    /// In listen mode, incoming argument sets are validated against it.
    /// In send mode, outgoing arguments are validated before the datagram
    /// is sent; without a manifest, validation is deferred to the server.
    #[arg(long, help_heading = "Core Options")]
    pub manifest: Option<PathBuf>,

    /// Channel to send on
    #[arg(short = 'c', long, default_value = "default", help_heading = "Send Options")]
    pub channel: String,

    /// Request name to invoke (required in send mode)
    #[arg(short = 'r', long, help_heading = "Send Options")]
    pub request: Option<String>,

    /// Request arguments as a JSON object literal
    #[arg(short = 'a', long, help_heading = "Send Options")]
    pub args: Option<String>,

    /// How long to wait for the response
    ///
    /// Supports human-readable formats like "500ms", "5s", "2m".
    #[arg(short = 't', long, value_parser = parse_duration, default_value = "5s", help_heading = "Send Options")]
    pub timeout: Duration,

    /// Send without a reply socket (fire-and-forget)
    #[arg(long, help_heading = "Send Options")]
    pub no_response: bool,

    /// Maximum concurrently executing handlers in listen mode
    #[arg(long, default_value_t = crate::defaults::MAX_CONNECTIONS, help_heading = "Listen Options")]
    pub max_connections: usize,

    /// Maximum message size in bytes
    #[arg(long, default_value_t = crate::defaults::MAX_MESSAGE_SIZE, help_heading = "Listen Options")]
    pub max_message_size: usize,

    /// Silence all user-facing informational output on stdout
    ///
    /// When this flag is present, only diagnostic logs will be shown.
    /// This is useful for scripting or when piping results to another program.
    #[arg(short = 'q', long, help_heading = "Output and Logging")]
    pub quiet: bool,

    /// Increase diagnostic log verbosity.
    ///
    /// Can be used multiple times to increase detail:
    ///  -v: debug
    ///  -vv and more: trace
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,

    /// Log file path, or "stderr" to log diagnostics to stderr
    #[arg(long, help_heading = "Output and Logging")]
    pub log_file: Option<String>,
}

impl Args {
    /// Build the server configuration for listen mode
    pub fn server_config(&self) -> ServerConfig {
        let mut config = ServerConfig::new(self.socket_path.clone());
        config.max_connections = self.max_connections;
        config.security = SecurityLimits {
            max_message_size: self.max_message_size,
            ..Default::default()
        };
        config
    }

    /// Build the client configuration for send mode
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.socket_path.clone(), self.channel.clone());
        config.default_timeout = self.timeout;
        config.security = SecurityLimits {
            max_message_size: self.max_message_size,
            ..Default::default()
        };
        config
    }

    /// Parse the `--args` JSON object literal, if present
    pub fn parsed_args(&self) -> Result<Option<Map<String, Value>>> {
        match self.args {
            Some(ref text) => {
                let value: Value = serde_json::from_str(text)
                    .context("--args is not valid JSON")?;
                match value {
                    Value::Object(map) => Ok(Some(map)),
                    _ => Err(anyhow!("--args must be a JSON object literal")),
                }
            }
            None => Ok(None),
        }
    }
}

/// Parse human-readable durations like "500ms", "10s", "5m", "1h"
///
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, unit) = match input.find(|c: char| c.is_ascii_alphabetic()) {
        Some(split) => input.split_at(split),
        None => (input, "s"),
    };

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration value '{number}'"))?;
    if value < 0.0 {
        return Err("duration must not be negative".to_string());
    }

    let duration = match unit {
        "ms" => Duration::from_secs_f64(value / 1000.0),
        "s" => Duration::from_secs_f64(value),
        "m" => Duration::from_secs_f64(value * 60.0),
        "h" => Duration::from_secs_f64(value * 3600.0),
        other => return Err(format!("unknown duration unit '{other}'")),
    };
    Ok(duration)
}
