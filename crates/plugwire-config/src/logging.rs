//! Output format of the diagnostics a plugin writes to standard error.
//!
//! Hosts usually capture a plugin's stderr alongside their own logs, so the
//! default is one JSON object per event. `compact` suits a developer running
//! the plugin binary by hand.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Format of plugin diagnostics on standard error.
///
/// Parsed case-insensitively, so `PLUGWIRE_LOG_FORMAT=JSON` and a
/// configuration file's `log_format = "compact"` both work.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event.
    #[default]
    Json,
    /// Single-line text for reading in a terminal.
    Compact,
}

/// Error returned when text names no [`LogFormat`].
pub type LogFormatParseError = strum::ParseError;
