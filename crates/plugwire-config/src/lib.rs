//! Process configuration shared by plugwire plugin binaries.
//!
//! Plugins are launched by their host with stdin and stdout reserved for the
//! JSON-RPC transport, so everything configured here concerns the process
//! around the engine: where diagnostics go and how large a single inbound
//! message may grow. Values are layered by `ortho_config` from configuration
//! files, `PLUGWIRE_*` environment variables and command-line flags, with
//! later layers taking precedence.
//!
//! Plugin options negotiated with the host (declared in the manifest and
//! delivered with `init`) are deliberately not part of this type; they belong
//! to the engine's option table.

mod defaults;
mod logging;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{DEFAULT_LOG_FILTER, default_log_filter, default_log_format};
pub use logging::{LogFormat, LogFormatParseError};

/// Default upper bound for a single buffered inbound message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Layered process configuration for a plugin binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PLUGWIRE")]
pub struct Config {
    /// Tracing filter expression, for example `info` or `plugwire=debug`.
    pub log_filter: Option<String>,
    /// Output format for the stderr tracing subscriber.
    pub log_format: Option<LogFormat>,
    /// Largest inbound message, in bytes, the decoder buffers before failing.
    pub max_message_bytes: Option<usize>,
}

impl Config {
    /// Returns the effective log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Returns the effective log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(default_log_format)
    }

    /// Returns the effective inbound message size limit.
    #[must_use]
    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes.unwrap_or(DEFAULT_MAX_MESSAGE_BYTES)
    }
}
