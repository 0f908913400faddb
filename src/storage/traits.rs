//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::idempotency::Reservation;
use crate::pagination::PageMetrics;
use crate::state::{Job, JobStatus};
use crate::storage::{
    DeadLetterEntry, DeadLetterRecord, JobResultRecord, JobRunRecord, PageMetricRecord, QueueStats,
};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The caller's lease expired and another worker may own the job now
    #[error("Lease lost for job {0}")]
    LeaseLost(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// This trait defines all database operations needed by the pipeline. Every
/// mutation that changes who owns a job is checked against the caller's lease,
/// so a worker whose visibility timeout expired cannot clobber the new owner.
pub trait Storage {
    // ===== Job Queue =====

    /// Inserts a new pending job
    fn insert_job(&mut self, job: &Job) -> StorageResult<()>;

    /// Gets a job by ID
    fn get_job(&self, job_id: &str) -> StorageResult<Option<Job>>;

    /// Atomically claims the next eligible job
    ///
    /// A job is eligible when it is pending and its retry time has passed, or
    /// when it is running but its lease has expired (the holder crashed).
    ///
    /// # Arguments
    ///
    /// * `now` - Current time
    /// * `visibility` - How long the claimed job stays invisible to others
    /// * `lease_id` - Token identifying this claim
    ///
    /// # Returns
    ///
    /// The claimed job in `running` state, or `None` if nothing is eligible
    fn claim_next_job(
        &mut self,
        now: DateTime<Utc>,
        visibility: Duration,
        lease_id: &str,
    ) -> StorageResult<Option<Job>>;

    /// Records the request fingerprint computed for a job
    fn set_request_fingerprint(&mut self, job_id: &str, fingerprint: &str) -> StorageResult<()>;

    /// Extends a held job's lease to `locked_until`
    ///
    /// Fails with `LeaseLost` if `lease_id` no longer holds the job, i.e. the
    /// lease expired and another worker claimed it.
    fn renew_lease(
        &mut self,
        job_id: &str,
        lease_id: &str,
        locked_until: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Marks a held job as done
    fn complete_job(
        &mut self,
        job_id: &str,
        lease_id: &str,
        content_fingerprint: Option<&str>,
    ) -> StorageResult<()>;

    /// Returns a held job to pending with a retry time
    fn reschedule_job(
        &mut self,
        job_id: &str,
        lease_id: &str,
        attempts: u32,
        next_eligible_at: DateTime<Utc>,
        backoff_ms: u64,
        error: &str,
    ) -> StorageResult<()>;

    /// Moves a held job to the dead-letter set
    fn dead_letter_job(
        &mut self,
        job_id: &str,
        lease_id: &str,
        entry: &DeadLetterEntry,
    ) -> StorageResult<()>;

    /// Returns a held job to pending without counting an attempt
    ///
    /// The job becomes claimable again at `next_eligible_at`.
    fn release_job(
        &mut self,
        job_id: &str,
        lease_id: &str,
        next_eligible_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Counts jobs in a given status
    fn count_jobs_by_status(&self, status: JobStatus) -> StorageResult<u64>;

    /// Counts jobs that may still be claimed now or later
    fn count_unfinished_jobs(&self) -> StorageResult<u64>;

    /// Deletes done jobs completed before `before`
    fn purge_done_jobs(&mut self, before: DateTime<Utc>) -> StorageResult<u64>;

    // ===== Dead Letters =====

    /// Lists dead-lettered jobs awaiting inspection, oldest first
    fn list_dead_letters(&self) -> StorageResult<Vec<DeadLetterRecord>>;

    /// Returns a dead-lettered job to pending with its attempts reset
    ///
    /// Returns false if the job is not currently dead-lettered.
    fn requeue_dead_letter(&mut self, job_id: &str, now: DateTime<Utc>) -> StorageResult<bool>;

    // ===== Idempotency =====

    /// Atomically reserves a fingerprint for a job
    ///
    /// Exactly one caller wins the reservation. A job that already owns the
    /// fingerprint wins again, so a redelivered job is not its own duplicate.
    /// Processed fingerprints older than `ttl` no longer count.
    fn reserve_fingerprint(
        &mut self,
        fingerprint: &str,
        job_id: &str,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> StorageResult<Reservation>;

    /// Marks a reserved fingerprint as processed
    fn mark_fingerprint_processed(
        &mut self,
        fingerprint: &str,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Drops a reservation held by `job_id`
    fn release_fingerprint(&mut self, fingerprint: &str, job_id: &str) -> StorageResult<()>;

    /// Deletes processed fingerprints older than `before`
    fn purge_fingerprints(&mut self, before: DateTime<Utc>) -> StorageResult<u64>;

    // ===== Audit =====

    /// Appends the audit record of one attempt
    fn record_job_run(&mut self, run: &JobRunRecord) -> StorageResult<i64>;

    /// Appends per-page metrics of one attempt
    fn record_page_metrics(
        &mut self,
        job_id: &str,
        attempt: u32,
        pages: &[PageMetrics],
    ) -> StorageResult<()>;

    /// Gets the attempt history of a job
    fn get_job_runs(&self, job_id: &str) -> StorageResult<Vec<JobRunRecord>>;

    /// Gets the page metrics of a job, in fetch order
    fn get_page_metrics(&self, job_id: &str) -> StorageResult<Vec<PageMetricRecord>>;

    // ===== Results Outbox =====

    /// Publishes a job's records to the results outbox
    ///
    /// Returns false if the job already has a published result.
    fn insert_result(&mut self, result: &JobResultRecord) -> StorageResult<bool>;

    /// Gets the published result of a job
    fn get_result(&self, job_id: &str) -> StorageResult<Option<JobResultRecord>>;

    // ===== Statistics =====

    /// Gets queue-wide counters
    fn queue_stats(&self) -> StorageResult<QueueStats>;
}
