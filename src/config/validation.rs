use crate::config::types::{Config, OutputConfig, RetryConfig, SourceEntry, WorkerConfig};
use crate::ConfigError;
use std::collections::HashSet;

/// Upper bound on concurrent workers
const MAX_CONCURRENCY: u32 = 64;

/// Upper bound on configured attempts
const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Lease headroom beyond the job timeout for bookkeeping after the fetch
const LEASE_MARGIN_SECS: u64 = 30;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_worker_config(&config.worker)?;
    validate_http_config(config)?;
    validate_retry_config(&config.retry)?;
    validate_output_config(&config.output)?;
    validate_sources(&config.sources)?;
    Ok(())
}

/// Validates worker configuration
fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > MAX_CONCURRENCY {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and {}, got {}",
            MAX_CONCURRENCY, config.concurrency
        )));
    }

    if config.job_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "job_timeout_secs must be >= 1".to_string(),
        ));
    }

    // The lease must outlive a full attempt plus the writes that follow it,
    // or a second worker claims a job that is still being processed.
    let min_visibility = config.job_timeout_secs.saturating_add(LEASE_MARGIN_SECS);
    if config.visibility_timeout_secs <= min_visibility {
        return Err(ConfigError::Validation(format!(
            "visibility_timeout_secs ({}) must exceed job_timeout_secs ({}) by more than {}s",
            config.visibility_timeout_secs, config.job_timeout_secs, LEASE_MARGIN_SECS
        )));
    }

    if config.poll_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "poll_interval_ms must be >= 10ms, got {}ms",
            config.poll_interval_ms
        )));
    }

    if config.maintenance_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "maintenance_interval_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates HTTP configuration
fn validate_http_config(config: &Config) -> Result<(), ConfigError> {
    let http = &config.http;

    if http.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if http.request_timeout_secs < 1 || http.connect_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "request and connect timeouts must be >= 1s, got {}s and {}s",
            http.request_timeout_secs, http.connect_timeout_secs
        )));
    }

    if http.request_timeout_secs > config.worker.job_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "request_timeout_secs ({}) must not exceed job_timeout_secs ({})",
            http.request_timeout_secs, config.worker.job_timeout_secs
        )));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts > MAX_ATTEMPTS_LIMIT {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be <= {}, got {}",
            MAX_ATTEMPTS_LIMIT, config.max_attempts
        )));
    }

    if config.base_backoff_ms == 0 {
        return Err(ConfigError::Validation(
            "base_backoff_ms must be >= 1".to_string(),
        ));
    }

    if config.base_backoff_ms > config.max_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "base_backoff_ms ({}) must not exceed max_backoff_ms ({})",
            config.base_backoff_ms, config.max_backoff_ms
        )));
    }

    if !(0.0..=1.0).contains(&config.jitter) {
        return Err(ConfigError::Validation(format!(
            "jitter must be between 0.0 and 1.0, got {}",
            config.jitter
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates declared sources
fn validate_sources(sources: &[SourceEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for entry in sources {
        validate_source_id(&entry.id)?;

        if !seen.insert(entry.id.as_str()) {
            return Err(ConfigError::InvalidSource(format!(
                "Source '{}' is declared more than once",
                entry.id
            )));
        }

        if entry.requests_per_minute == Some(0) {
            return Err(ConfigError::InvalidSource(format!(
                "Source '{}' must allow at least one request per minute",
                entry.id
            )));
        }

        for name in entry.headers.keys() {
            if name.trim().is_empty() || name.chars().any(|c| c.is_whitespace() || c == ':') {
                return Err(ConfigError::InvalidSource(format!(
                    "Source '{}' has an invalid header name '{}'",
                    entry.id, name
                )));
            }
        }
    }

    Ok(())
}

/// Validates a source identifier
fn validate_source_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::InvalidSource(
            "Source id cannot be empty".to_string(),
        ));
    }

    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ConfigError::InvalidSource(format!(
            "Source id '{}' contains invalid characters",
            id
        )));
    }

    Ok(())
}
