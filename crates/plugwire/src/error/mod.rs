//! Errors raised by the plugin engine.
//!
//! All errors use a `thiserror`-derived enum with structured context so
//! callers can inspect the failure programmatically. I/O errors are wrapped in
//! `Arc` to keep the type `Send + Sync` and cheap to move.
//!
//! The variants follow the engine's failure taxonomy: protocol errors are
//! fatal to the transport, configuration errors are fatal at build time,
//! lifecycle misuse by a handler is rejected without producing output, and
//! handler-raised errors become error replies for the affected command.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors arising from plugin engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The inbound byte stream could not be decoded into JSON-RPC messages.
    #[error("protocol error: {message}")]
    Protocol {
        /// Human-readable description of the framing failure.
        message: String,
        /// Optional underlying JSON error.
        #[source]
        source: Option<serde_json::Error>,
    },

    /// A single inbound message grew beyond the configured size limit.
    #[error("inbound message exceeds {max_bytes} byte limit ({buffered} bytes buffered)")]
    MessageTooLarge {
        /// Bytes buffered when the limit was hit.
        buffered: usize,
        /// Configured limit.
        max_bytes: usize,
    },

    /// The static registration tables are inconsistent.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the invalid registration.
        message: String,
    },

    /// Ordering constraints between hook implementations form a cycle.
    #[error("hook '{hook}' has cyclic ordering constraints between: {}", plugins.join(", "))]
    HookCycle {
        /// Hook whose registrations cannot be ordered.
        hook: String,
        /// Plugins taking part in the cycle, in registration order.
        plugins: Vec<String>,
    },

    /// A handler attempted to produce a second terminal response.
    #[error("command '{method}' already produced its terminal response")]
    AlreadyTerminal {
        /// Method of the command that was already finished.
        method: String,
    },

    /// A handler broke the dispatch contract for the command it was given.
    #[error("protocol violation by handler for '{method}': {message}")]
    ProtocolViolation {
        /// Method of the offending command.
        method: String,
        /// What the handler did wrong.
        message: String,
    },

    /// A handler reported a failure without building an error reply itself.
    #[error("handler for '{method}' failed: {message}")]
    Handler {
        /// Method of the failing command.
        method: String,
        /// Failure description forwarded to the host.
        message: String,
    },

    /// Reading from or writing to the host transport failed.
    #[error("I/O error on plugin transport: {0}")]
    Io(#[source] Arc<io::Error>),

    /// An outgoing message could not be serialised.
    #[error("failed to serialise outgoing message: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl EngineError {
    /// Returns `true` when the error must stop the engine.
    ///
    /// Lifecycle misuse and handler failures only affect the command they
    /// belong to; everything else leaves the transport or registries in a
    /// state that cannot be trusted further.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::AlreadyTerminal { .. } | Self::Handler { .. })
    }

    /// Creates a protocol error from a JSON syntax error.
    #[must_use]
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::Protocol {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a protocol error with a custom message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a protocol violation error for the given method.
    pub fn violation(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Creates a handler failure for the given method.
    pub fn handler(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            method: method.into(),
            message: message.into(),
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(source: io::Error) -> Self {
        Self::Io(Arc::new(source))
    }
}
