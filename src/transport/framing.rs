//! Length-prefixed stream framing
//!
//! Every message on a stream link, in both directions:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)       │
//! │ Big-endian u32   │ packet, envelope or JSON │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! - **Maximum frame size**: 1MB (1,048,576 bytes); larger prefixes close the connection
//! - **Clean close**: EOF exactly at a frame boundary
//! - **Short read**: EOF inside a prefix or payload is [`TransportError::IncompleteFrame`]
//!
//! Writers send prefix and payload in one `write_all` so a receiver never
//! observes a prefix without the start of its payload in the same segment.

use crate::error::TransportError;
use std::io::{ErrorKind, Read, Write};

/// Size of the big-endian length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Sanity limit for announced frame sizes
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Bytes requested from the socket per read
const READ_CHUNK: usize = 4096;

/// Prefix `payload` with its big-endian length
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Write one frame as a single logical unit
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    writer.write_all(&encode_frame(payload))?;
    writer.flush()?;
    Ok(())
}

/// Incremental frame reader
///
/// Keeps partially received bytes across calls, so a read timeout in the
/// middle of a frame loses nothing: the caller polls again and the frame
/// completes on a later call.
pub struct FrameReader {
    buffer: Vec<u8>,
    max_frame: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(READ_CHUNK),
            max_frame,
        }
    }

    /// Bytes held for an incomplete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Read until one complete frame is available
    ///
    /// Returns `Ok(None)` when the reader's timeout expires first; buffered
    /// bytes are kept for the next call. Returns [`TransportError::Closed`]
    /// on EOF at a frame boundary.
    pub fn read_frame<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.try_take()? {
                return Ok(Some(frame));
            }

            match reader.read(&mut chunk) {
                Ok(0) => return Err(self.eof_error()),
                Ok(n) => {
                    log::trace!("Read {} bytes ({} buffered)", n, self.buffer.len());
                    self.buffer.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    /// Pop a complete frame from the buffer if one is present
    fn try_take(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.buffer.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;

        if len > self.max_frame {
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: self.max_frame,
            });
        }

        let total = LENGTH_PREFIX_LEN + len;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let frame = self.buffer[LENGTH_PREFIX_LEN..total].to_vec();
        self.buffer.drain(..total);
        Ok(Some(frame))
    }

    fn eof_error(&self) -> TransportError {
        if self.buffer.is_empty() {
            return TransportError::Closed;
        }
        let expected = if self.buffer.len() < LENGTH_PREFIX_LEN {
            LENGTH_PREFIX_LEN
        } else {
            let len = u32::from_be_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]) as usize;
            LENGTH_PREFIX_LEN + len
        };
        TransportError::IncompleteFrame {
            expected,
            received: self.buffer.len(),
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}
