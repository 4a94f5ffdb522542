//! Length-prefix message framing
//!
//! The optional codec for auxiliary transports that are streams rather than
//! datagrams. A frame is a `u32` big-endian length followed by that many
//! JSON bytes. The datagram path never uses this: the kernel preserves
//! datagram boundaries on its own.

use crate::error::{IpcError, Result};

/// Byte length of the frame header
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Encode one message as a length-prefixed frame
///
/// ## Rejections
///
/// - Empty payloads: a zero-length frame is meaningless and decodes as a
///   framing error on the peer, so it is refused at encode time too
/// - Payloads larger than `max_frame_size`
pub fn encode_frame(payload: &[u8], max_frame_size: usize) -> Result<Vec<u8>> {
    if payload.is_empty() {
        return Err(IpcError::MessageFramingError(
            "refusing to encode a zero-length frame".to_string(),
        ));
    }
    if payload.len() > max_frame_size {
        return Err(IpcError::MessageFramingError(format!(
            "frame of {} bytes exceeds the {} byte limit",
            payload.len(),
            max_frame_size
        )));
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Incremental decoder for a stream of length-prefixed frames
///
/// Feed arbitrary byte chunks as they arrive; complete messages come back
/// out, and partial prefixes (< 4 bytes) or partial bodies stay buffered
/// until the next feed.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder enforcing the given frame size ceiling
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
        }
    }

    /// Append received bytes and extract every complete message
    ///
    /// ## Returns
    /// - `Ok(messages)`: zero or more complete message bodies, in order
    /// - `Err(MessageFramingError)`: a zero-length or over-limit frame was
    ///   seen; the decoder should be discarded along with its stream
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buffer.extend_from_slice(bytes);

        let mut messages = Vec::new();
        loop {
            if self.buffer.len() < LENGTH_PREFIX_BYTES {
                break;
            }

            let mut prefix = [0u8; LENGTH_PREFIX_BYTES];
            prefix.copy_from_slice(&self.buffer[..LENGTH_PREFIX_BYTES]);
            let declared = u32::from_be_bytes(prefix) as usize;

            if declared == 0 {
                return Err(IpcError::MessageFramingError(
                    "zero-length frame".to_string(),
                ));
            }
            if declared > self.max_frame_size {
                return Err(IpcError::MessageFramingError(format!(
                    "declared frame of {declared} bytes exceeds the {} byte limit",
                    self.max_frame_size
                )));
            }

            if self.buffer.len() < LENGTH_PREFIX_BYTES + declared {
                // Partial body; wait for more bytes.
                break;
            }

            let body: Vec<u8> = self
                .buffer
                .drain(..LENGTH_PREFIX_BYTES + declared)
                .skip(LENGTH_PREFIX_BYTES)
                .collect();
            messages.push(body);
        }

        Ok(messages)
    }

    /// Bytes currently buffered awaiting a complete frame
    pub fn remaining(&self) -> &[u8] {
        &self.buffer
    }

    /// The frame size ceiling this decoder enforces
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}
