//! Error types for pgmodel
//!
//! This module defines the common error types used throughout the workspace.

use thiserror::Error;

/// Common result type for pgmodel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for pgmodel
#[derive(Debug, Error)]
pub enum Error {
    // Startup errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    // Metrics errors
    #[error("metric {name} is already registered as a {registered}")]
    MetricKindMismatch {
        name: String,
        registered: &'static str,
    },

    // Database probe errors
    #[error("database probe failed: {0}")]
    Probe(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a probe error
    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    /// Check if this error was raised while validating startup configuration
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::ConfigParse(_))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_configuration() {
        assert!(Error::configuration("labels cache size must be > 0").is_configuration());
        assert!(Error::ConfigParse("bad".into()).is_configuration());
        assert!(!Error::probe("connection refused").is_configuration());
    }

    #[test]
    fn test_error_display() {
        let err = Error::MetricKindMismatch {
            name: "promscale_cache_hits_total".into(),
            registered: "gauge",
        };
        assert_eq!(
            err.to_string(),
            "metric promscale_cache_hits_total is already registered as a gauge"
        );
    }
}
