//! Sumi-Ingest: a resilient paginated ingestion pipeline
//!
//! This crate turns unreliable, paginated HTTP sources into bounded, ordered
//! sequences of normalized records. Jobs flow through a durable SQLite-backed
//! queue, are deduplicated by content fingerprint, fetched page by page under
//! a rate limit, and either persisted, retried with backoff, or dead-lettered.

pub mod config;
pub mod fetch;
pub mod idempotency;
pub mod output;
pub mod pagination;
pub mod queue;
pub mod retry;
pub mod state;
pub mod storage;
pub mod worker;

use thiserror::Error;

/// Main error type for Sumi-Ingest operations
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pagination error: {0}")]
    Pagination(#[from] pagination::PaginationError),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Sink error: {0}")]
    Sink(#[from] worker::SinkError),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition {
        from: state::JobStatus,
        to: state::JobStatus,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid source entry: {0}")]
    InvalidSource(String),
}

/// Result type alias for Sumi-Ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use pagination::{FetchResult, PaginationConfig, PaginationStrategy, TerminalReason};
pub use state::{Job, JobRequest, JobStatus};
