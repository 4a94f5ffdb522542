//! # Datagram Transport Module
//!
//! Connectionless SOCK_DGRAM plumbing for the IPC layer. Each message is one
//! self-contained datagram: the kernel preserves message boundaries, there
//! is no connection state, and a response travels to a short-lived reply
//! socket named inside the request rather than back along a stream.
//!
//! ## Transport Architecture
//!
//! ```
//! ┌────────────┐  request datagram   ┌────────────┐
//! │   Client   │────────────────────▶│   Server   │
//! │            │                     │   socket   │
//! │ reply sock │◀────────────────────│            │
//! └────────────┘  response datagram  └────────────┘
//! ```
//!
//! ## Submodules
//!
//! - [`datagram`]: bind/send/receive primitives, reply-socket lifecycle,
//!   per-datagram size probing, socket file cleanup
//! - [`framing`]: the optional length-prefix codec for auxiliary stream
//!   transports; the datagram path never uses it
//! - [`stream`]: a framed SOCK_STREAM transport built on the codec, for
//!   peers that cannot speak datagrams

use std::path::PathBuf;

pub mod datagram;
pub mod framing;
pub mod stream;

pub use datagram::{
    bind_datagram, probe_max_datagram_size, recv_from, send_to, ReplySocket,
};
pub use framing::{encode_frame, FrameDecoder};
pub use stream::{FramedStream, FramedStreamServer};

/// Transport configuration shared by client and server
///
/// ## Transport Compatibility
///
/// `reply_socket_dir` and `reply_socket_prefix` only matter on the client
/// side, where per-request reply sockets are created; the server only ever
/// reads reply paths out of requests.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound for a single message in bytes
    ///
    /// Applied before send and on receive. The effective per-datagram limit
    /// may be lower, as discovered by [`probe_max_datagram_size`].
    pub max_message_size: usize,

    /// Receive buffer size for one datagram read
    pub recv_buffer_size: usize,

    /// Directory where reply sockets are created
    ///
    /// Must be under one of the security validator's allowed roots.
    pub reply_socket_dir: PathBuf,

    /// Filename prefix for reply sockets
    pub reply_socket_prefix: String,
}

impl Default for TransportConfig {
    /// Create default transport configuration
    ///
    /// ## Default Values
    ///
    /// - Max message size: 10MB (matches the security validator default)
    /// - Receive buffer: 128KB (upper bound of the datagram size probe)
    /// - Reply socket directory: /tmp (allowed root, world-writable)
    /// - Reply socket prefix: "dgram_ipc"
    fn default() -> Self {
        Self {
            max_message_size: crate::security::DEFAULT_MAX_MESSAGE_SIZE,
            recv_buffer_size: datagram::PROBE_CEILING_BYTES,
            reply_socket_dir: PathBuf::from("/tmp"),
            reply_socket_prefix: "dgram_ipc".to_string(),
        }
    }
}
