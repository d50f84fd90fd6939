//! Newline-delimited serialisation of outgoing messages.

use std::io::Write;

use super::OutgoingMessage;
use crate::error::EngineError;

/// Destination for messages the engine sends to the host.
///
/// The run loop queues everything a handler emits and hands it to the sink in
/// order once the handler returns, then flushes.
#[cfg_attr(test, mockall::automock)]
pub trait MessageSink {
    /// Writes one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be serialised or written.
    fn send(&mut self, message: &OutgoingMessage) -> Result<(), EngineError>;

    /// Flushes buffered output to the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails.
    fn flush(&mut self) -> Result<(), EngineError>;
}

/// Writes each message as a single JSON line.
pub struct JsonlWriter<W> {
    writer: W,
}

impl<W: Write> JsonlWriter<W> {
    /// Wraps the given output stream.
    #[must_use]
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> MessageSink for JsonlWriter<W> {
    fn send(&mut self, message: &OutgoingMessage) -> Result<(), EngineError> {
        serde_json::to_writer(&mut self.writer, message).map_err(EngineError::Serialize)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        self.writer.flush()?;
        Ok(())
    }
}
