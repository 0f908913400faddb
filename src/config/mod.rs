//! Configuration module for Sumi-Ingest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_ingest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("ingest.toml")).unwrap();
//! println!("Workers: {}", config.worker.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, HttpConfig, IdempotencyConfig, OutputConfig, RetryConfig, SourceEntry, WorkerConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
