use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for Sumi-Ingest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    pub output: OutputConfig,
    #[serde(rename = "source", default)]
    pub sources: Vec<SourceEntry>,
}

impl Config {
    /// Looks up a declared source by id
    pub fn source(&self, id: &str) -> Option<&SourceEntry> {
        self.sources.iter().find(|s| s.id == id)
    }
}

/// Worker pool and queue behavior
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of jobs processed concurrently
    #[serde(rename = "concurrency", default = "default_concurrency")]
    pub concurrency: u32,

    /// How long a claimed job stays invisible to other workers (seconds)
    #[serde(
        rename = "visibility-timeout-secs",
        default = "default_visibility_timeout"
    )]
    pub visibility_timeout_secs: u64,

    /// Upper bound on a single job attempt (seconds)
    #[serde(rename = "job-timeout-secs", default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// Wait between queue polls when no job is eligible (milliseconds)
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long finished jobs are kept before purging (hours)
    #[serde(rename = "retention-hours", default = "default_retention_hours")]
    pub retention_hours: u64,

    /// Interval of the maintenance task (seconds)
    #[serde(
        rename = "maintenance-interval-secs",
        default = "default_maintenance_interval"
    )]
    pub maintenance_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            visibility_timeout_secs: default_visibility_timeout(),
            job_timeout_secs: default_job_timeout(),
            poll_interval_ms: default_poll_interval(),
            retention_hours: default_retention_hours(),
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// TCP connect timeout (seconds)
    #[serde(rename = "connect-timeout-secs", default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Refuse plain-HTTP endpoints
    #[serde(rename = "https-only", default)]
    pub https_only: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            https_only: false,
        }
    }
}

/// Retry and backoff policy
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Failed attempts tolerated before a job is dead-lettered
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit (milliseconds); failure number n waits `base * 2^n`
    #[serde(rename = "base-backoff-ms", default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// Backoff ceiling (milliseconds)
    #[serde(rename = "max-backoff-ms", default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Random spread applied to each backoff, as a fraction (0.25 = ±25%)
    #[serde(rename = "jitter", default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff(),
            max_backoff_ms: default_max_backoff(),
            jitter: default_jitter(),
        }
    }
}

/// Duplicate suppression
#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    /// How long a processed fingerprint suppresses duplicates (hours, 0 = forever)
    #[serde(rename = "fingerprint-ttl-hours", default = "default_fingerprint_ttl")]
    pub fingerprint_ttl_hours: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            fingerprint_ttl_hours: default_fingerprint_ttl(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Hand partial records of dead-lettered jobs to the sink
    #[serde(rename = "persist-partial", default)]
    pub persist_partial: bool,
}

/// A declared ingestion source
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    /// Source identifier, matched against a trigger's `source_id`
    pub id: String,

    /// Request ceiling for this source; overrides per-job page delays
    #[serde(rename = "requests-per-minute", default)]
    pub requests_per_minute: Option<u32>,

    /// Headers added to every request for this source
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_concurrency() -> u32 {
    4
}

fn default_visibility_timeout() -> u64 {
    300
}

fn default_job_timeout() -> u64 {
    240
}

fn default_poll_interval() -> u64 {
    500
}

fn default_retention_hours() -> u64 {
    24
}

fn default_maintenance_interval() -> u64 {
    60
}

fn default_user_agent() -> String {
    format!("sumi-ingest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    300_000
}

fn default_jitter() -> f64 {
    0.25
}

fn default_fingerprint_ttl() -> u64 {
    24
}
