//! Diagnostics for plugin processes.
//!
//! Standard output carries the JSON-RPC conversation with the host, so every
//! `tracing` event from the engine and from handlers goes to standard error,
//! where hosts typically collect it. Messages meant for the host's own log go
//! through `PluginContext::log` instead.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use plugwire_config::{Config, LogFormat};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle {
    installed: bool,
}

impl TelemetryHandle {
    /// Returns `true` for the call that installed the subscriber.
    #[must_use]
    pub const fn installed(self) -> bool {
        self.installed
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured log filter expression does not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Expression taken from the configuration.
        filter: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Routes the plugin's `tracing` events to standard error.
///
/// A plugin binary calls this once after loading its [`Config`] and before
/// serving the host. Only the first call installs the subscriber; its handle
/// reports [`installed`](TelemetryHandle::installed). Later calls leave the
/// global state alone.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable filter expression and
/// [`TelemetryError::Subscriber`] when something else already installed a
/// global subscriber.
///
/// # Examples
///
/// ```rust
/// use plugwire::telemetry;
/// use plugwire_config::Config;
///
/// # fn main() -> Result<(), plugwire::telemetry::TelemetryError> {
/// let config = Config::default();
/// let first = telemetry::initialise(&config)?;
/// let second = telemetry::initialise(&config)?;
/// assert!(first.installed());
/// assert!(!second.installed());
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    let mut installed = false;
    TELEMETRY_GUARD.get_or_try_init(|| {
        installed = true;
        install_subscriber(config)
    })?;
    Ok(TelemetryHandle { installed })
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter()).map_err(|error| {
        TelemetryError::Filter {
            filter: config.log_filter().to_owned(),
            message: error.to_string(),
        }
    })?;

    let builder = |env_filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
