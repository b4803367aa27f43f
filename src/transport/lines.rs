//! Newline-delimited framing for the device-facing encrypted hop
//!
//! Each line is `base64(AES-CBC(plaintext))` followed by `\n`. Blank lines
//! and trailing `\r` are ignored. Decryption happens in the bridge; this
//! module only splits the byte stream.

use crate::error::TransportError;
use std::io::{ErrorKind, Read, Write};

/// Longest accepted line (without the terminator)
pub const MAX_LINE_LEN: usize = 64 * 1024;

const READ_CHUNK: usize = 2048;

/// Incremental line reader, tolerant of read timeouts
pub struct LineReader {
    buffer: Vec<u8>,
}

impl LineReader {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Read until one non-empty line is available
    ///
    /// Same contract as [`super::framing::FrameReader::read_frame`]:
    /// `Ok(None)` on timeout, `Closed` on EOF with nothing pending.
    pub fn read_line<R: Read + ?Sized>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(line) = self.try_take()? {
                return Ok(Some(line));
            }

            match reader.read(&mut chunk) {
                Ok(0) => {
                    if self.buffer.iter().all(|b| b.is_ascii_whitespace()) {
                        return Err(TransportError::Closed);
                    }
                    return Err(TransportError::IncompleteFrame {
                        expected: self.buffer.len() + 1,
                        received: self.buffer.len(),
                    });
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    fn try_take(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = raw.trim_ascii();
            if !line.is_empty() {
                return Ok(Some(line.to_vec()));
            }
        }
        if self.buffer.len() > MAX_LINE_LEN {
            return Err(TransportError::FrameTooLarge {
                size: self.buffer.len(),
                max: MAX_LINE_LEN,
            });
        }
        Ok(None)
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Write one line, appending the terminator
pub fn write_line<W: Write + ?Sized>(writer: &mut W, line: &[u8]) -> Result<(), TransportError> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line);
    buf.push(b'\n');
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_splits_and_skips_blank_lines() {
        let mut cursor = Cursor::new(b"abc\r\n\n  \nxyz\n".to_vec());
        let mut reader = LineReader::new();
        assert_eq!(reader.read_line(&mut cursor).unwrap().unwrap(), b"abc");
        assert_eq!(reader.read_line(&mut cursor).unwrap().unwrap(), b"xyz");
        assert!(matches!(
            reader.read_line(&mut cursor),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_unterminated_tail_is_incomplete() {
        let mut reader = LineReader::new();
        let result = reader.read_line(&mut Cursor::new(b"partial".to_vec()));
        assert!(matches!(result, Err(TransportError::IncompleteFrame { .. })));
    }

    #[test]
    fn test_runaway_line_rejected() {
        let mut reader = LineReader::new();
        let data = vec![b'A'; MAX_LINE_LEN + READ_CHUNK];
        let err = reader.read_line(&mut Cursor::new(data)).unwrap_err();
        assert!(err.is_framing());
    }

    #[test]
    fn test_write_line() {
        let mut out = Vec::new();
        write_line(&mut out, b"QUJD").unwrap();
        assert_eq!(out, b"QUJD\n");
    }
}
