//! Storage module for persisting pipeline state
//!
//! This module handles all database operations for the pipeline, including:
//! - SQLite database initialization and schema management
//! - The durable job queue with visibility-timeout leases
//! - The dead-letter set
//! - Fingerprint reservations for idempotency
//! - Per-attempt and per-page audit records
//! - The results outbox read by downstream consumers

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::pagination::NormalizedRecord;
use crate::state::JobStatus;
use crate::IngestError;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Storage shared between workers
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(IngestError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, IngestError> {
    SqliteStorage::new(path)
}

/// Wraps a storage backend for sharing between tasks
pub fn shared(storage: SqliteStorage) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Locks shared storage, mapping a poisoned lock to a storage error
pub fn lock(storage: &SharedStorage) -> StorageResult<MutexGuard<'_, SqliteStorage>> {
    storage.lock().map_err(|_| StorageError::LockPoisoned)
}

/// Why a job was dead-lettered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// Transient failures exceeded the attempt ceiling
    AttemptsExhausted,

    /// The failure could never succeed on retry
    NonRetryable,
}

impl DeadLetterReason {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::AttemptsExhausted => "attempts_exhausted",
            Self::NonRetryable => "non_retryable",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "attempts_exhausted" => Some(Self::AttemptsExhausted),
            "non_retryable" => Some(Self::NonRetryable),
            _ => None,
        }
    }
}

/// Data written when a job is dead-lettered
#[derive(Debug, Clone)]
pub struct DeadLetterEntry {
    pub reason: DeadLetterReason,
    pub attempts: u32,
    pub last_error: String,
    pub status_code: Option<u16>,

    /// Records fetched before the final failure
    pub partial_records: Vec<NormalizedRecord>,
}

/// Represents a dead-lettered job in the database
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterRecord {
    pub id: i64,
    pub job_id: String,
    pub source_id: String,
    pub reason: DeadLetterReason,
    pub attempts: u32,
    pub last_error: String,
    pub status_code: Option<u16>,
    pub partial_record_count: usize,
    pub dead_lettered_at: String,
}

/// Audit record of one job attempt
#[derive(Debug, Clone, Serialize)]
pub struct JobRunRecord {
    pub job_id: String,
    pub attempt: u32,

    /// Outcome of this attempt (`done`, `failed`, `dead_lettered`, `pending`)
    pub status: JobStatus,

    pub started_at: String,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub pages_processed: u32,
    pub records_fetched: u64,
    pub execution_time_ms: u64,
    pub terminal_reason: Option<String>,
}

/// Persisted metrics of one fetched page
#[derive(Debug, Clone, PartialEq)]
pub struct PageMetricRecord {
    pub job_id: String,
    pub attempt: u32,
    pub page_index: u32,
    pub item_count: u64,
    pub duration_ms: u64,
    pub status_code: u16,
    pub url: String,
}

/// A job's published records
#[derive(Debug, Clone)]
pub struct JobResultRecord {
    pub job_id: String,
    pub source_id: String,
    pub content_fingerprint: Option<String>,
    pub records_json: String,
    pub summary_json: String,
    pub created_at: String,
}

/// Queue-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub running: u64,
    pub failed: u64,
    pub done: u64,
    pub dead_lettered: u64,
    pub fingerprints: u64,
    pub results: u64,
}

impl QueueStats {
    pub fn total_jobs(&self) -> u64 {
        self.pending + self.running + self.failed + self.done + self.dead_lettered
    }
}
