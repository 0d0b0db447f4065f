//! Line codec: frames a TCP byte stream into text lines.
//!
//! Any of `\r\n`, `\r` or `\n` ends a line. Bytes that are not valid UTF-8
//! are replaced with U+FFFD. Outgoing lines get a bare `\n` terminator.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum line length (excluding the terminator).
pub const MAX_LINE_LENGTH: usize = 8191;

/// Codec error: either an oversized line or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec that frames text on line-ending boundaries.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// The last line ended in a `\r` at the end of the buffer, so a `\n`
    /// opening the next read belongs to that terminator.
    after_cr: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.after_cr && !src.is_empty() {
            if src[0] == b'\n' {
                src.advance(1);
            }
            self.after_cr = false;
        }

        match src.iter().position(|b| *b == b'\n' || *b == b'\r') {
            Some(pos) => {
                if pos > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                let line_bytes = src.split_to(pos);
                let terminator = src[0];
                src.advance(1);
                if terminator == b'\r' {
                    match src.first().copied() {
                        Some(b'\n') => src.advance(1),
                        Some(_) => {}
                        None => self.after_cr = true,
                    }
                }
                Ok(Some(to_line(&line_bytes)))
            }
            None => {
                // No complete line yet. Check if buffer is getting too large.
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Peer closed mid-line: hand over what it sent.
        let rest = src.split_to(src.len());
        Ok(Some(to_line(&rest)))
    }
}

impl Encoder<String> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
