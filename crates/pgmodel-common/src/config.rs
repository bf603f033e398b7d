//! Configuration types for pgmodel
//!
//! Every field has a default so a partial (or missing) TOML file still
//! yields a usable configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default capacity of the inverted labels cache, in bytes
pub const DEFAULT_INVERTED_LABELS_CACHE_SIZE: u64 = 500_000;

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cache sizing
    #[serde(default)]
    pub cache: CacheConfig,
    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Synthetic ingestion workload
    #[serde(default)]
    pub ingest: IngestConfig,
}

/// Cache sizing configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Capacity of the inverted labels cache in bytes
    #[serde(default = "default_inverted_labels_size")]
    pub inverted_labels_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            inverted_labels_size: default_inverted_labels_size(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Synthetic ingestion workload configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Number of parallel ingestion workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Label lookups performed by each worker
    #[serde(default = "default_ops_per_worker")]
    pub ops_per_worker: usize,
    /// Number of distinct metric names
    #[serde(default = "default_metrics")]
    pub metrics: usize,
    /// Number of distinct label values per metric
    #[serde(default = "default_label_values")]
    pub label_values: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            ops_per_worker: default_ops_per_worker(),
            metrics: default_metrics(),
            label_values: default_label_values(),
        }
    }
}

fn default_inverted_labels_size() -> u64 {
    DEFAULT_INVERTED_LABELS_CACHE_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_ops_per_worker() -> usize {
    100_000
}

fn default_metrics() -> usize {
    50
}

fn default_label_values() -> usize {
    200
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, falling back to defaults when it does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Reject settings that cannot produce a working process
    pub fn validate(&self) -> Result<()> {
        if self.cache.inverted_labels_size == 0 {
            return Err(Error::configuration(
                "cache.inverted_labels_size must be > 0",
            ));
        }
        if self.ingest.workers == 0 {
            return Err(Error::configuration("ingest.workers must be > 0"));
        }
        if self.ingest.metrics == 0 || self.ingest.label_values == 0 {
            return Err(Error::configuration(
                "ingest.metrics and ingest.label_values must be > 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(
            config.cache.inverted_labels_size,
            DEFAULT_INVERTED_LABELS_CACHE_SIZE
        );
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [cache]
            inverted_labels_size = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.cache.inverted_labels_size, 4096);
        assert_eq!(config.ingest.workers, 4);
    }

    #[test]
    fn test_zero_cache_size_rejected() {
        let err = Config::from_toml("[cache]\ninverted_labels_size = 0\n").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::from_toml("[cache\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.ingest.metrics, 50);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\n[ingest]\nworkers = 8").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.ingest.workers, 8);
    }
}
