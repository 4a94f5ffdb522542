//! Framed stream transport
//!
//! The auxiliary transport for peers that cannot speak datagrams: a Unix
//! SOCK_STREAM connection carrying length-prefixed frames (`u32` big-endian
//! length + JSON bytes, the [`super::framing`] codec). Unlike the datagram
//! path, a stream has no kernel-preserved message boundaries, so the
//! decoder reassembles frames from arbitrary read chunks.
//!
//! ## Relationship to the Datagram Path
//!
//! The datagram socket is the primary path and never uses framing. This
//! module exists for auxiliary integrations; it shares the message types,
//! the size ceiling, and the framing error taxonomy, and nothing else
//! leaks between the two.

use super::framing::{encode_frame, FrameDecoder};
use crate::error::{IpcError, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

/// Read chunk size for the stream reassembly loop
const READ_CHUNK_BYTES: usize = 8192;

/// One framed stream connection
///
/// Wraps a Unix stream with the length-prefix codec: sends are framed
/// whole, receives are reassembled from however the kernel chunks the
/// bytes. Messages decoded beyond the one currently requested are queued
/// and handed out in order on subsequent calls.
#[derive(Debug)]
pub struct FramedStream {
    stream: UnixStream,
    decoder: FrameDecoder,
    ready: VecDeque<Vec<u8>>,
}

impl FramedStream {
    /// Connect to a framed stream server
    pub async fn connect(path: &Path, max_frame_size: usize) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        debug!("Connected framed stream to {:?}", path);
        Ok(Self::from_stream(stream, max_frame_size))
    }

    fn from_stream(stream: UnixStream, max_frame_size: usize) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(max_frame_size),
            ready: VecDeque::new(),
        }
    }

    /// Send one message as a single frame
    ///
    /// The frame is written and flushed before returning, so a subsequent
    /// peer read observes the whole message or none of it.
    pub async fn send_message(&mut self, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(payload, self.decoder.max_frame_size())?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive the next complete message
    ///
    /// Reads from the stream until the decoder yields at least one frame,
    /// queueing any extras. A cleanly closed peer mid-frame is a framing
    /// error; a close on a frame boundary surfaces as `UnexpectedEof` from
    /// the next call.
    pub async fn recv_message(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(message) = self.ready.pop_front() {
                return Ok(message);
            }

            let mut chunk = [0u8; READ_CHUNK_BYTES];
            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                if self.decoder.remaining().is_empty() {
                    return Err(IpcError::Transport(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "stream closed",
                    )));
                }
                return Err(IpcError::MessageFramingError(
                    "stream closed mid-frame".to_string(),
                ));
            }

            for message in self.decoder.feed(&chunk[..read])? {
                self.ready.push_back(message);
            }
        }
    }
}

/// Listener side of the framed stream transport
///
/// Owns the socket file: binding unlinks any stale file first, and the
/// file is removed again when the server drops, matching the cleanup
/// discipline of the datagram path.
#[derive(Debug)]
pub struct FramedStreamServer {
    listener: UnixListener,
    path: PathBuf,
    max_frame_size: usize,
}

impl FramedStreamServer {
    /// Bind a stream listener at `path`, replacing any stale socket file
    pub fn bind(path: &Path, max_frame_size: usize) -> Result<Self> {
        if path.exists() {
            debug!("Removing stale stream socket file at {:?}", path);
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(IpcError::Transport(e));
                }
            }
        }

        let listener = UnixListener::bind(path)?;
        #[cfg(unix)]
        {
            use std::fs;
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o666));
        }

        debug!("Framed stream server listening on {:?}", path);
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            max_frame_size,
        })
    }

    /// Accept one connection as a framed stream
    pub async fn accept(&self) -> Result<FramedStream> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(FramedStream::from_stream(stream, self.max_frame_size))
    }

    /// Bound socket path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FramedStreamServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove stream socket {:?}: {}", self.path, e);
            }
        }
    }
}
