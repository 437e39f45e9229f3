//! Error types for watchdog checks and configuration

use thiserror::Error;

/// A call-site descriptor that cannot be turned into text or a log scope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("call site has no declaring type")]
    MissingDeclaringType,

    #[error("call site in {declaring_type} has no method name")]
    MissingMethod { declaring_type: String },
}

/// Invalid watchdog or monitor settings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("limit must be > 0, got {limit} (target: {target})")]
    NonPositiveLimit { target: String, limit: i64 },

    #[error("poll interval must be > 0 ms")]
    ZeroPollInterval,
}

/// Errors surfaced by a single `check()` of one watchdog
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchdogError {
    #[error("watchdog limit must be > 0, got {limit}")]
    InvalidLimit { limit: i64 },

    #[error("failed to render call site: {0}")]
    Render(#[from] RenderError),
}

/// Result type for watchdog checks
pub type Result<T> = std::result::Result<T, WatchdogError>;
