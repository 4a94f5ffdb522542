//! Unix domain datagram primitives
//!
//! Everything that touches a SOCK_DGRAM socket lives here: binding the
//! well-known server socket, creating per-request reply sockets, sending
//! and receiving single datagrams, probing the kernel's per-datagram size
//! limit, and unlinking socket files on every exit path.

use super::TransportConfig;
use crate::error::{IpcError, Result, SecurityViolationKind};
use crate::security::MAX_SOCKET_PATH_BYTES;
use crate::utils::current_timestamp_ns;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::net::UnixDatagram;
use tracing::{debug, warn};

/// Starting size for the datagram limit probe
pub const PROBE_FLOOR_BYTES: usize = 1024;

/// Upper bound for the datagram limit probe
///
/// The effective limit is platform-discovered; the probe just stops looking
/// past this point.
pub const PROBE_CEILING_BYTES: usize = 128 * 1024;

/// Random suffix length on reply socket paths
const REPLY_SUFFIX_LEN: usize = 8;

// Probed once, shared by every socket in the process.
static PROBED_MAX_DATAGRAM: OnceLock<usize> = OnceLock::new();

/// Bind a datagram socket at `path`, replacing any stale socket file
///
/// A leftover file from a crashed process is unlinked before binding. If
/// the bind still races with a concurrent creator, the unlink-and-bind is
/// retried once and the second failure is returned.
pub fn bind_datagram(path: &Path) -> Result<UnixDatagram> {
    check_path_length(path)?;

    if path.exists() {
        debug!("Removing stale socket file at {:?}", path);
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(IpcError::Transport(e));
            }
        }
    }

    let socket = match UnixDatagram::bind(path) {
        Ok(socket) => socket,
        Err(first_err) if first_err.kind() == std::io::ErrorKind::AddrInUse => {
            // Lost a race with another process creating the same path.
            // One retry after a fresh unlink, then give up.
            warn!("Bind raced on {:?}, retrying once", path);
            let _ = std::fs::remove_file(path);
            UnixDatagram::bind(path)?
        }
        Err(e) => return Err(IpcError::Transport(e)),
    };

    // Relax permissions so host and container users can connect
    #[cfg(unix)]
    {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o666));
    }

    debug!("Bound datagram socket at {:?}", path);
    Ok(socket)
}

/// Send one datagram to the socket bound at `path`
///
/// ## Error Mapping
///
/// - `EMSGSIZE` becomes [`IpcError::PayloadTooLarge`] carrying the probed
///   per-datagram limit
/// - Other socket errors (`ENOENT`, `ECONNREFUSED`, ...) surface as typed
///   transport errors
pub async fn send_to(socket: &UnixDatagram, path: &Path, bytes: &[u8]) -> Result<()> {
    check_path_length(path)?;

    match socket.send_to(bytes, path).await {
        Ok(sent) => {
            if sent != bytes.len() {
                return Err(IpcError::InternalError(format!(
                    "short datagram send: {sent} of {} bytes",
                    bytes.len()
                )));
            }
            Ok(())
        }
        Err(e) if e.raw_os_error() == Some(libc::EMSGSIZE) => Err(IpcError::PayloadTooLarge {
            size: bytes.len(),
            limit: PROBED_MAX_DATAGRAM.get().copied().unwrap_or(0),
        }),
        Err(e) => Err(IpcError::Transport(e)),
    }
}

/// Receive one datagram, honoring an optional deadline
///
/// Reads up to `buffer_size` bytes. The peer address of a datagram sender
/// is usually anonymous and is not returned; correlation happens by
/// request id, never by peer.
pub async fn recv_from(
    socket: &UnixDatagram,
    buffer_size: usize,
    deadline: Option<Duration>,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; buffer_size];

    let received = match deadline {
        Some(timeout) => {
            match tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await {
                Ok(io_result) => io_result.map(|(n, _addr)| n)?,
                Err(_elapsed) => {
                    return Err(IpcError::RequestTimeout {
                        timeout_secs: timeout.as_secs_f64(),
                    });
                }
            }
        }
        None => socket.recv_from(&mut buf).await.map(|(n, _addr)| n)?,
    };

    buf.truncate(received);
    Ok(buf)
}

/// A short-lived datagram socket bound solely to receive one response
///
/// The socket file is unlinked when the guard drops, so cleanup runs on
/// every exit path: success, error, cancellation, or panic unwinding.
#[derive(Debug)]
pub struct ReplySocket {
    socket: UnixDatagram,
    path: PathBuf,
}

impl ReplySocket {
    /// Create a uniquely named reply socket under the configured directory
    ///
    /// The path shape is
    /// `<dir>/<prefix>_response_<unix_nanos>_<rand>[_<label>].sock`.
    /// Nanosecond time alone is not unique enough under high request rates,
    /// so a random alphanumeric suffix is always appended. An optional
    /// caller label slots in before the extension for debuggability of
    /// parallel batches.
    pub fn create(config: &TransportConfig, label: Option<&str>) -> Result<Self> {
        let rand_suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(REPLY_SUFFIX_LEN)
            .map(char::from)
            .collect();

        let file_name = match label {
            Some(label) => format!(
                "{}_response_{}_{}_{}.sock",
                config.reply_socket_prefix,
                current_timestamp_ns(),
                rand_suffix,
                label
            ),
            None => format!(
                "{}_response_{}_{}.sock",
                config.reply_socket_prefix,
                current_timestamp_ns(),
                rand_suffix
            ),
        };
        let path = config.reply_socket_dir.join(file_name);

        let socket = bind_datagram(&path)?;
        Ok(Self { socket, path })
    }

    /// Absolute path of this reply socket, as carried in `reply_to`
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The path as a string for embedding into a request
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// Wait for one datagram on this reply socket
    pub async fn recv(&self, buffer_size: usize, deadline: Option<Duration>) -> Result<Vec<u8>> {
        recv_from(&self.socket, buffer_size, deadline).await
    }

    /// Borrow the underlying socket, used by waiters that `select!` over it
    pub fn socket(&self) -> &UnixDatagram {
        &self.socket
    }
}

impl Drop for ReplySocket {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove reply socket {:?}: {}", self.path, e);
            }
        }
    }
}

/// Unlink a socket file, tolerating its absence
///
/// Used by the server on shutdown; reply sockets clean themselves up via
/// [`ReplySocket`]'s `Drop`.
pub fn cleanup_socket_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove socket file {:?}: {}", path, e);
        }
    }
}

/// Discover the kernel's effective per-datagram size limit
///
/// Runs a doubling search from [`PROBE_FLOOR_BYTES`] up to
/// [`PROBE_CEILING_BYTES`] over an anonymous socket pair, sending to self;
/// the last size the kernel accepted is the limit. The result is cached
/// for the lifetime of the process, so only the first caller pays for the
/// probe.
pub async fn probe_max_datagram_size() -> usize {
    if let Some(&cached) = PROBED_MAX_DATAGRAM.get() {
        return cached;
    }

    let probed = run_probe().await.unwrap_or(PROBE_FLOOR_BYTES);
    // Another task may have finished probing first; keep whichever landed.
    let _ = PROBED_MAX_DATAGRAM.set(probed);
    *PROBED_MAX_DATAGRAM.get().unwrap_or(&probed)
}

async fn run_probe() -> Result<usize> {
    let (sender, receiver) = UnixDatagram::pair()?;

    let mut last_ok = 0usize;
    let mut size = PROBE_FLOOR_BYTES;
    let mut drain = vec![0u8; PROBE_CEILING_BYTES];

    while size <= PROBE_CEILING_BYTES {
        let payload = vec![0u8; size];
        match sender.send(&payload).await {
            Ok(_) => {
                // Drain so the pair's buffer never fills across iterations.
                let _ = receiver.recv(&mut drain).await;
                last_ok = size;
                size *= 2;
            }
            Err(e) if e.raw_os_error() == Some(libc::EMSGSIZE) => break,
            Err(e) => return Err(IpcError::Transport(e)),
        }
    }

    let limit = if last_ok == 0 { PROBE_FLOOR_BYTES } else { last_ok };
    debug!("Probed per-datagram size limit: {} bytes", limit);
    Ok(limit)
}

/// Fail fast when a path cannot fit in `sockaddr_un.sun_path`
fn check_path_length(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len > MAX_SOCKET_PATH_BYTES {
        return Err(IpcError::security(
            SecurityViolationKind::PathTooLong,
            format!("socket path is {len} bytes, limit is {MAX_SOCKET_PATH_BYTES} bytes"),
        ));
    }
    Ok(())
}
