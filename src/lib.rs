//! # Datagram IPC Layer
//!
//! A cross-language request/response IPC layer over Unix domain datagram
//! sockets. A server binds a well-known socket path, accepts self-contained
//! request datagrams, dispatches them to registered handlers, and returns a
//! response datagram to a per-request reply socket supplied by the caller;
//! callers may also fire and forget.

pub mod cli;
pub mod client;
pub mod error;
pub mod manifest;
pub mod message;
pub mod security;
pub mod server;
pub mod timeout;
pub mod transport;
pub mod utils;

pub use client::{
    Client, ClientConfig, ParallelRequest, PendingRequestStatistics, RequestHandle, RequestStatus,
    SendOptions,
};
pub use error::{ErrorObject, IpcError, Result, SecurityViolationKind};
pub use manifest::{ArgType, ArgumentSpec, ChannelSpec, Manifest, RequestSpec};
pub use message::{Request, Response};
pub use security::{SecurityLimits, SecurityValidator};
pub use server::{
    EventKind, HandlerOutcome, Server, ServerConfig, ServerEvent, TypedHandler,
};
pub use timeout::{TimeoutManager, TimeoutStatistics};
pub use transport::TransportConfig;

/// The current version of the datagram IPC layer
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Default tracked-request timeout on the client
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default handler deadline on the server
    pub const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default maximum message size in bytes
    pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

    /// Default cap on concurrently executing handlers
    pub const MAX_CONNECTIONS: usize = 16;

    /// Default grace period for in-flight handlers during shutdown
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

    /// Default reply-socket filename prefix
    pub const REPLY_SOCKET_PREFIX: &str = "dgram_ipc";
}
