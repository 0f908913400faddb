use crate::pagination::NormalizedRecord;
use crate::retry::RetryDecision;
use crate::state::{Job, JobRequest};
use crate::storage::{
    self, DeadLetterEntry, DeadLetterRecord, QueueStats, SharedStorage, Storage, StorageError,
    StorageResult,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Durable job queue with visibility-timeout leases
///
/// Dequeuing claims a job under a fresh lease id. Until the lease expires no
/// other worker can see the job; once it expires without an ack, the next
/// claim redelivers it. Expired leases are reaped as part of the claim query,
/// so there is no separate sweeper.
#[derive(Clone)]
pub struct JobQueue {
    storage: SharedStorage,
    notify: Arc<Notify>,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl JobQueue {
    /// Creates a queue over shared storage
    ///
    /// # Arguments
    ///
    /// * `storage` - The shared database
    /// * `visibility_timeout` - How long a claimed job stays invisible
    /// * `poll_interval` - Upper bound on how long an idle `dequeue` sleeps
    ///   before checking for newly eligible retries
    pub fn new(storage: SharedStorage, visibility_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            storage,
            notify: Arc::new(Notify::new()),
            visibility_timeout,
            poll_interval,
        }
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Adds a new pending job for `request`
    pub fn enqueue(&self, request: JobRequest) -> StorageResult<Job> {
        let job = Job::new(request);
        storage::lock(&self.storage)?.insert_job(&job)?;
        tracing::debug!(job_id = %job.id, source_id = job.source_id(), "Job enqueued");
        self.notify.notify_one();
        Ok(job)
    }

    /// Claims the next eligible job without waiting
    pub fn try_dequeue(&self) -> StorageResult<Option<Job>> {
        let visibility = self.visibility()?;
        let lease_id = Uuid::new_v4().to_string();

        let job = storage::lock(&self.storage)?.claim_next_job(Utc::now(), visibility, &lease_id)?;
        if let Some(job) = &job {
            if job.attempts > 0 {
                tracing::debug!(job_id = %job.id, attempts = job.attempts, "Retrying job");
            }
        }
        Ok(job)
    }

    /// Waits for the next eligible job
    ///
    /// # Returns
    ///
    /// * `Ok(Some(job))` - A job claimed under a fresh lease
    /// * `Ok(None)` - Shutdown was requested before work arrived
    /// * `Err(StorageError)` - The claim failed
    pub async fn dequeue(&self, cancel: &CancellationToken) -> StorageResult<Option<Job>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            if let Some(job) = self.try_dequeue()? {
                return Ok(Some(job));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Extends a held job's lease by a full visibility timeout
    ///
    /// Called right before side effects that must happen once, so a holder
    /// whose lease expired (and whose job was claimed again) stops there.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The caller still holds the job
    /// * `Err(StorageError::LeaseLost)` - Another claim has taken over
    pub fn renew(&self, job: &Job) -> StorageResult<()> {
        let lease_id = held_lease(job)?;
        let locked_until = Utc::now() + self.visibility()?;
        storage::lock(&self.storage)?.renew_lease(&job.id, lease_id, locked_until)
    }

    /// Marks a held job as done
    pub fn ack(&self, job: &Job, content_fingerprint: Option<&str>) -> StorageResult<()> {
        let lease_id = held_lease(job)?;
        storage::lock(&self.storage)?.complete_job(&job.id, lease_id, content_fingerprint)
    }

    /// Applies a failed attempt's retry decision to a held job
    ///
    /// # Arguments
    ///
    /// * `job` - The job as claimed
    /// * `decision` - The coordinator's decision for this failure
    /// * `last_error` - Message of the failure that ended the attempt
    /// * `status_code` - HTTP status of the failure, if any
    /// * `partial_records` - Records to retain with a dead-letter entry
    pub fn nack(
        &self,
        job: &Job,
        decision: &RetryDecision,
        last_error: &str,
        status_code: Option<u16>,
        partial_records: Vec<NormalizedRecord>,
    ) -> StorageResult<()> {
        let lease_id = held_lease(job)?;

        match decision {
            RetryDecision::Retry {
                attempts,
                backoff,
                next_eligible_at,
            } => storage::lock(&self.storage)?.reschedule_job(
                &job.id,
                lease_id,
                *attempts,
                *next_eligible_at,
                backoff.as_millis() as u64,
                last_error,
            ),
            RetryDecision::DeadLetter { attempts, reason } => {
                let entry = DeadLetterEntry {
                    reason: *reason,
                    attempts: *attempts,
                    last_error: last_error.to_string(),
                    status_code,
                    partial_records,
                };
                storage::lock(&self.storage)?.dead_letter_job(&job.id, lease_id, &entry)
            }
            RetryDecision::Release => self.release(job),
        }
    }

    /// Hands a held job back without counting an attempt
    pub fn release(&self, job: &Job) -> StorageResult<()> {
        let lease_id = held_lease(job)?;
        storage::lock(&self.storage)?.release_job(&job.id, lease_id, Utc::now())?;
        self.notify.notify_one();
        Ok(())
    }

    /// Hands a held job back until `delay` has passed, without counting an
    /// attempt
    pub fn defer(&self, job: &Job, delay: Duration) -> StorageResult<()> {
        let lease_id = held_lease(job)?;
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| StorageError::Database(format!("Invalid defer delay: {}", e)))?;
        storage::lock(&self.storage)?.release_job(&job.id, lease_id, Utc::now() + delay)
    }

    /// Returns true while any job is pending, running or failed
    pub fn has_unfinished(&self) -> StorageResult<bool> {
        Ok(storage::lock(&self.storage)?.count_unfinished_jobs()? > 0)
    }

    pub fn get_job(&self, job_id: &str) -> StorageResult<Option<Job>> {
        storage::lock(&self.storage)?.get_job(job_id)
    }

    pub fn stats(&self) -> StorageResult<QueueStats> {
        storage::lock(&self.storage)?.queue_stats()
    }

    pub fn dead_letters(&self) -> StorageResult<Vec<DeadLetterRecord>> {
        storage::lock(&self.storage)?.list_dead_letters()
    }

    /// Moves a dead-lettered job back to pending with a fresh attempt count
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The job was requeued
    /// * `Ok(false)` - The job is not dead-lettered
    pub fn requeue(&self, job_id: &str) -> StorageResult<bool> {
        let requeued = storage::lock(&self.storage)?.requeue_dead_letter(job_id, Utc::now())?;
        if requeued {
            tracing::info!(job_id, "Dead-lettered job requeued");
            self.notify.notify_one();
        }
        Ok(requeued)
    }

    fn visibility(&self) -> StorageResult<chrono::Duration> {
        chrono::Duration::from_std(self.visibility_timeout)
            .map_err(|e| StorageError::Database(format!("Invalid visibility timeout: {}", e)))
    }
}

fn held_lease(job: &Job) -> StorageResult<&str> {
    job.lease_id
        .as_deref()
        .ok_or_else(|| StorageError::LeaseLost(job.id.clone()))
}
