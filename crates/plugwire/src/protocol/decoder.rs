//! Incremental decoding of the inbound byte stream.

use serde_json::Value;
use tracing::warn;

use super::Message;
use crate::error::EngineError;

/// Tracing target for codec operations.
pub(crate) const CODEC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::codec");

/// Default upper bound for a single buffered inbound message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = plugwire_config::DEFAULT_MAX_MESSAGE_BYTES;

/// Result of looking for one JSON value at the front of the buffer.
enum Scan {
    Empty,
    Incomplete,
    Malformed(serde_json::Error),
    Complete { value: Value, len: usize },
}

/// Progress through the value at the front of the buffer.
///
/// Bytes are examined once as they arrive; the buffered value is only handed
/// to `serde_json` when its closing delimiter has been seen.
#[derive(Debug, Default, Clone, Copy)]
struct FrameScanner {
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl FrameScanner {
    /// Advances over `bytes[self.scanned..]` and returns the length of the
    /// first complete container or string, if it has closed.
    fn advance(&mut self, bytes: &[u8]) -> Option<usize> {
        let fresh = bytes.get(self.scanned..).unwrap_or_default();
        for (offset, byte) in fresh.iter().enumerate() {
            let closed = if self.in_string {
                self.step_in_string(*byte)
            } else {
                self.step_outside_string(*byte)
            };
            if closed {
                let len = self.scanned.saturating_add(offset).saturating_add(1);
                *self = Self::default();
                return Some(len);
            }
        }
        self.scanned = bytes.len();
        None
    }

    fn step_in_string(&mut self, byte: u8) -> bool {
        if self.escaped {
            self.escaped = false;
        } else if byte == b'\\' {
            self.escaped = true;
        } else if byte == b'"' {
            self.in_string = false;
            return self.depth == 0;
        }
        false
    }

    fn step_outside_string(&mut self, byte: u8) -> bool {
        match byte {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth = self.depth.saturating_add(1),
            b'}' | b']' => {
                self.depth = self.depth.saturating_sub(1);
                return self.depth == 0;
            }
            _ => {}
        }
        false
    }
}

/// Buffers inbound bytes and yields complete JSON-RPC messages.
///
/// Values may be separated by any amount of whitespace, so both
/// newline-delimited framing and the blank-line framing some hosts use are
/// accepted. A value that is only partially buffered stays in the buffer until
/// more bytes arrive.
///
/// # Example
///
/// ```
/// use plugwire::protocol::{Message, MessageDecoder};
///
/// let mut decoder = MessageDecoder::new();
/// decoder.feed(br#"{"jsonrpc":"2.0","id":1,"method":"help"#);
/// assert!(decoder.next_message().expect("decode").is_none());
///
/// decoder.feed(b"\",\"params\":{}}\n");
/// let message = decoder.next_message().expect("decode").expect("complete");
/// assert!(matches!(message, Message::Request { .. }));
/// ```
#[derive(Debug)]
pub struct MessageDecoder {
    buffer: Vec<u8>,
    max_bytes: usize,
    scanner: FrameScanner,
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDecoder {
    /// Creates a decoder with the default message size limit.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_MESSAGE_BYTES)
    }

    /// Creates a decoder that rejects messages larger than `max_bytes`.
    #[must_use]
    pub const fn with_limit(max_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_bytes,
            scanner: FrameScanner {
                scanned: 0,
                depth: 0,
                in_string: false,
                escaped: false,
            },
        }
    }

    /// Appends bytes read from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub const fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decodes the next complete message, if one is buffered.
    ///
    /// Well-formed values that carry no `id` and are not valid JSON-RPC
    /// envelopes are skipped with a warning, since nobody is waiting for an
    /// answer to them. Invalid envelopes with an `id` are returned as
    /// [`Message::Invalid`] or as a failed [`Message::Response`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Protocol`] for malformed JSON and
    /// [`EngineError::MessageTooLarge`] when an incomplete value outgrows the
    /// size limit.
    pub fn next_message(&mut self) -> Result<Option<Message>, EngineError> {
        loop {
            let (value, consumed) = match self.scan() {
                Scan::Empty => return Ok(None),
                Scan::Incomplete => {
                    if self.buffer.len() > self.max_bytes {
                        return Err(EngineError::MessageTooLarge {
                            buffered: self.buffer.len(),
                            max_bytes: self.max_bytes,
                        });
                    }
                    return Ok(None);
                }
                Scan::Malformed(error) => return Err(EngineError::from_json_error(error)),
                Scan::Complete { value, len } => (value, len),
            };
            self.buffer.drain(..consumed.min(self.buffer.len()));

            match Message::from_value(value) {
                Ok(message) => return Ok(Some(message)),
                Err(reason) => {
                    warn!(
                        target: CODEC_TARGET,
                        reason = reason.as_str(),
                        "skipping malformed notification"
                    );
                }
            }
        }
    }

    /// Looks for one complete value at the front of the buffer, dropping
    /// whitespace in front of it.
    fn scan(&mut self) -> Scan {
        if self.scanner.scanned == 0 {
            let start = self
                .buffer
                .iter()
                .position(|byte| !byte.is_ascii_whitespace())
                .unwrap_or(self.buffer.len());
            self.buffer.drain(..start);
        }
        let Some(first) = self.buffer.first().copied() else {
            return Scan::Empty;
        };
        if !matches!(first, b'{' | b'[' | b'"') {
            return self.scan_scalar();
        }

        let Some(len) = self.scanner.advance(&self.buffer) else {
            return Scan::Incomplete;
        };
        let frame = self.buffer.get(..len).unwrap_or_default();
        match serde_json::from_slice::<Value>(frame) {
            Ok(value) => Scan::Complete { value, len },
            Err(error) => Scan::Malformed(error),
        }
    }

    /// Parses a bare number or literal, which has no closing delimiter.
    fn scan_scalar(&self) -> Scan {
        let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
        match stream.next() {
            None => Scan::Empty,
            Some(Ok(value)) => Scan::Complete {
                value,
                len: stream.byte_offset(),
            },
            Some(Err(error)) if error.is_eof() => Scan::Incomplete,
            Some(Err(error)) => Scan::Malformed(error),
        }
    }

    /// Checks that the stream ended on a message boundary.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Protocol`] when a partial message is left in the
    /// buffer at end of stream.
    pub fn finish(&self) -> Result<(), EngineError> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            Ok(())
        } else {
            Err(EngineError::protocol(format!(
                "stream ended inside a message ({} bytes pending)",
                self.buffer.len()
            )))
        }
    }
}
