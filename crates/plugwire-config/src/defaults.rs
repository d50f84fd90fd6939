/// Default log filter expression used by plugin binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default log filter expression used by plugin binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for plugin binaries.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}
