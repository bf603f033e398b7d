//! pgmodel Common - Shared types and utilities
//!
//! This crate provides the error definitions and configuration types
//! used across all pgmodel components.

pub mod config;
pub mod error;

pub use config::{CacheConfig, Config, IngestConfig, LoggingConfig};
pub use error::{Error, Result};
