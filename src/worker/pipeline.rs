//! Processing of a single claimed job
//!
//! One attempt runs through these steps:
//!
//! 1. Reserve the request fingerprint; a duplicate trigger is acked as done
//!    without touching the network once its owner is done, and deferred
//!    while the owner may still fail
//! 2. Walk the endpoint's pages with the fetch engine
//! 3. On success, reserve the content fingerprint, renew the lease, hand the
//!    records to the sink, mark both fingerprints processed and ack
//! 4. On failure, let the retry coordinator choose between retry,
//!    dead-letter and release
//!
//! Every attempt leaves a `job_runs` row and one `page_metrics` row per page.

use crate::config::Config;
use crate::fetch::{FetchFailure, PageFetcher};
use crate::idempotency::{content_fingerprint, request_fingerprint, IdempotencyStore, Reservation};
use crate::pagination::{FetchEngine, FetchResult, FetchTarget, RunControl};
use crate::queue::JobQueue;
use crate::retry::{RetryCoordinator, RetryDecision, RetryPolicy};
use crate::state::{Job, JobStatus};
use crate::storage::{self, DeadLetterReason, JobRunRecord, Storage};
use crate::worker::sink::{RecordBatch, RecordSink};
use crate::IngestError;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How one attempt of a job ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Records were persisted and the job is done
    Succeeded { pages: usize, records: usize },

    /// The request or its content was already owned by another job
    Duplicate { owner: String },

    /// The owning job has not finished yet; the job is pending again after
    /// `delay`, with no attempt counted
    Deferred { owner: String, delay: Duration },

    /// The job is pending again after a backoff
    Retried { attempts: u32, backoff: Duration },

    /// The job moved to the dead-letter set
    DeadLettered {
        attempts: u32,
        reason: DeadLetterReason,
    },

    /// Shutdown interrupted the attempt; the job is pending again
    Released,
}

/// Runs claimed jobs end to end
pub struct JobProcessor {
    config: Arc<Config>,
    queue: JobQueue,
    idempotency: IdempotencyStore,
    engine: FetchEngine,
    coordinator: RetryCoordinator,
    sink: Arc<dyn RecordSink>,
}

impl JobProcessor {
    pub fn new(
        config: Arc<Config>,
        queue: JobQueue,
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let idempotency = IdempotencyStore::new(queue.storage().clone(), &config.idempotency);
        let coordinator = RetryCoordinator::new(RetryPolicy::from_config(&config.retry));

        Self {
            config,
            queue,
            idempotency,
            engine: FetchEngine::new(fetcher),
            coordinator,
            sink,
        }
    }

    pub fn idempotency(&self) -> &IdempotencyStore {
        &self.idempotency
    }

    /// Processes one claimed job
    ///
    /// # Arguments
    ///
    /// * `job` - A job as returned by [`JobQueue::dequeue`], holding a lease
    /// * `cancel` - Shutdown signal; interrupts the fetch at the next page
    ///
    /// # Returns
    ///
    /// * `Ok(JobOutcome)` - The job's new state was recorded
    /// * `Err(IngestError)` - Bookkeeping failed; the lease is left to expire
    ///   so the job is redelivered
    pub async fn process(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, IngestError> {
        let started_at = Utc::now();
        let attempt = job.next_attempt();

        let request_fp = match &job.request_fingerprint {
            Some(fp) => fp.clone(),
            None => {
                let fp = request_fingerprint(&job.request)?;
                storage::lock(self.queue.storage())?.set_request_fingerprint(&job.id, &fp)?;
                fp
            }
        };

        let reservation = self.idempotency.check_and_reserve(&request_fp, &job.id)?;
        if let Reservation::AlreadyProcessed { owner } = reservation {
            if let Some(outcome) = self.defer_behind(job, attempt, started_at, &owner, None)? {
                return Ok(outcome);
            }
            tracing::info!(job_id = %job.id, owner = %owner, "Duplicate request, skipping fetch");
            self.queue.ack(job, None)?;
            let run = self.run_record(
                job,
                attempt,
                JobStatus::Done,
                started_at,
                None,
                Some(format!("Duplicate of job {}", owner)),
            );
            self.save_run(&run)?;
            return Ok(JobOutcome::Duplicate { owner });
        }

        tracing::info!(
            job_id = %job.id,
            source_id = job.source_id(),
            strategy = job.request.pagination.strategy.name(),
            attempt,
            "Starting job"
        );

        let target = FetchTarget::new(&job.request, self.config.source(job.source_id()));
        let control = RunControl::new(
            cancel.clone(),
            Some(Duration::from_secs(self.config.worker.job_timeout_secs)),
        );
        let mut result = self.engine.run(&target, &control).await;

        storage::lock(self.queue.storage())?.record_page_metrics(&job.id, attempt, &result.pages)?;

        match result.failure.take() {
            None => {
                self.handle_success(job, attempt, started_at, &request_fp, result)
                    .await
            }
            Some(failure) => {
                self.handle_failure(job, attempt, started_at, &request_fp, result, failure)
                    .await
            }
        }
    }

    async fn handle_success(
        &self,
        job: &Job,
        attempt: u32,
        started_at: DateTime<Utc>,
        request_fp: &str,
        result: FetchResult,
    ) -> Result<JobOutcome, IngestError> {
        let content_fp = content_fingerprint(job.source_id(), &result.records);

        if let Some(fp) = &content_fp {
            let reservation = self.idempotency.check_and_reserve(fp, &job.id)?;
            if let Reservation::AlreadyProcessed { owner } = reservation {
                if let Some(outcome) =
                    self.defer_behind(job, attempt, started_at, &owner, Some(&result))?
                {
                    return Ok(outcome);
                }
                tracing::info!(job_id = %job.id, owner = %owner, "Identical content already ingested");
                self.idempotency.mark_processed(request_fp, &job.id)?;
                self.queue.ack(job, Some(fp))?;
                let run = self.run_record(
                    job,
                    attempt,
                    JobStatus::Done,
                    started_at,
                    Some(&result),
                    Some(format!("Duplicate content of job {}", owner)),
                );
                self.save_run(&run)?;
                return Ok(JobOutcome::Duplicate { owner });
            }
        }

        let summary = result.summary();
        let batch = RecordBatch {
            job_id: &job.id,
            source_id: job.source_id(),
            content_fingerprint: content_fp.as_deref(),
            records: &result.records,
            summary: &summary,
        };

        // Reservations are keyed by job id, so a worker that claimed this job
        // after our lease expired would pass them too. Only the live holder
        // may persist.
        if let Err(e) = self.queue.renew(job) {
            tracing::warn!(job_id = %job.id, error = %e, "Lease lost before persisting, dropping attempt");
            return Err(e.into());
        }

        if let Err(e) = self.sink.persist(&batch).await {
            if let Some(fp) = &content_fp {
                self.idempotency.release(fp, &job.id)?;
            }
            let failure = FetchFailure::transient(format!("Sink error: {}", e));
            return self
                .handle_failure(job, attempt, started_at, request_fp, result, failure)
                .await;
        }

        if let Some(fp) = &content_fp {
            self.idempotency.mark_processed(fp, &job.id)?;
        }
        self.idempotency.mark_processed(request_fp, &job.id)?;
        self.queue.ack(job, content_fp.as_deref())?;

        tracing::info!(
            job_id = %job.id,
            pages = result.pages_fetched(),
            records = result.total_records,
            terminal_reason = %result.terminal_reason,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Job completed"
        );

        let run = self.run_record(job, attempt, JobStatus::Done, started_at, Some(&result), None);
        self.save_run(&run)?;

        Ok(JobOutcome::Succeeded {
            pages: result.pages_fetched(),
            records: result.total_records,
        })
    }

    async fn handle_failure(
        &self,
        job: &Job,
        attempt: u32,
        started_at: DateTime<Utc>,
        request_fp: &str,
        result: FetchResult,
        failure: FetchFailure,
    ) -> Result<JobOutcome, IngestError> {
        let decision = self.coordinator.decide(job.attempts, &failure, Utc::now());

        match decision {
            RetryDecision::Retry {
                attempts, backoff, ..
            } => {
                if !result.records.is_empty() {
                    tracing::warn!(
                        job_id = %job.id,
                        pages = result.pages_fetched(),
                        records = result.total_records,
                        "Discarding partial results before retry"
                    );
                }
                tracing::warn!(
                    job_id = %job.id,
                    attempt = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %failure,
                    "Job attempt failed, retry scheduled"
                );

                self.queue.nack(
                    job,
                    &decision,
                    &failure.message,
                    failure.status_code,
                    Vec::new(),
                )?;
                let run = self.run_record(
                    job,
                    attempt,
                    JobStatus::Failed,
                    started_at,
                    Some(&result),
                    Some(failure.message),
                );
                self.save_run(&run)?;

                Ok(JobOutcome::Retried { attempts, backoff })
            }
            RetryDecision::DeadLetter { attempts, reason } => {
                tracing::error!(
                    job_id = %job.id,
                    attempts,
                    reason = reason.to_db_string(),
                    partial_records = result.total_records,
                    error = %failure,
                    "Job dead-lettered"
                );

                if self.config.output.persist_partial && !result.records.is_empty() {
                    self.queue.renew(job)?;
                    self.persist_partial(job, &result).await;
                }

                let run = self.run_record(
                    job,
                    attempt,
                    JobStatus::DeadLettered,
                    started_at,
                    Some(&result),
                    Some(failure.message.clone()),
                );
                self.queue.nack(
                    job,
                    &decision,
                    &failure.message,
                    failure.status_code,
                    result.records,
                )?;
                // A fresh trigger for the same request may try again
                self.idempotency.release(request_fp, &job.id)?;
                self.save_run(&run)?;

                Ok(JobOutcome::DeadLettered { attempts, reason })
            }
            RetryDecision::Release => {
                tracing::info!(job_id = %job.id, "Attempt interrupted by shutdown, releasing job");
                self.queue.release(job)?;
                let run = self.run_record(
                    job,
                    attempt,
                    JobStatus::Pending,
                    started_at,
                    Some(&result),
                    Some(failure.message),
                );
                self.save_run(&run)?;

                Ok(JobOutcome::Released)
            }
        }
    }

    /// Defers `job` while `owner` has not reached done
    ///
    /// Acking a duplicate whose owner later dead-letters would leave the
    /// payload with nobody to ingest it. A dead-lettered owner releases its
    /// request fingerprint, so the deferred job reserves it on its next claim.
    fn defer_behind(
        &self,
        job: &Job,
        attempt: u32,
        started_at: DateTime<Utc>,
        owner: &str,
        result: Option<&FetchResult>,
    ) -> Result<Option<JobOutcome>, IngestError> {
        // A purged owner was done
        let owner_job = match self.queue.get_job(owner)? {
            Some(owner_job) if owner_job.status != JobStatus::Done => owner_job,
            _ => return Ok(None),
        };

        let base = Duration::from_millis(self.config.retry.base_backoff_ms);
        let until_owner = (owner_job.next_eligible_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let delay = base.max(until_owner);

        tracing::info!(
            job_id = %job.id,
            owner,
            owner_status = %owner_job.status,
            delay_ms = delay.as_millis() as u64,
            "Owner still in flight, deferring duplicate"
        );

        self.queue.defer(job, delay)?;
        let run = self.run_record(
            job,
            attempt,
            JobStatus::Pending,
            started_at,
            result,
            Some(format!("Waiting on job {}", owner)),
        );
        self.save_run(&run)?;

        Ok(Some(JobOutcome::Deferred {
            owner: owner.to_string(),
            delay,
        }))
    }

    async fn persist_partial(&self, job: &Job, result: &FetchResult) {
        let summary = result.summary();
        let batch = RecordBatch {
            job_id: &job.id,
            source_id: job.source_id(),
            content_fingerprint: None,
            records: &result.records,
            summary: &summary,
        };

        if let Err(e) = self.sink.persist(&batch).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to persist partial results");
        }
    }

    fn run_record(
        &self,
        job: &Job,
        attempt: u32,
        status: JobStatus,
        started_at: DateTime<Utc>,
        result: Option<&FetchResult>,
        error_message: Option<String>,
    ) -> JobRunRecord {
        let completed_at = Utc::now();
        let execution_time_ms = match result {
            Some(r) => r.elapsed.as_millis() as u64,
            None => (completed_at - started_at).num_milliseconds().max(0) as u64,
        };

        JobRunRecord {
            job_id: job.id.clone(),
            attempt,
            status,
            started_at: started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            completed_at: Some(completed_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            error_message,
            pages_processed: result.map(|r| r.pages_fetched() as u32).unwrap_or(0),
            records_fetched: result.map(|r| r.total_records as u64).unwrap_or(0),
            execution_time_ms,
            terminal_reason: result.map(|r| r.terminal_reason.as_str().to_string()),
        }
    }

    fn save_run(&self, run: &JobRunRecord) -> Result<(), IngestError> {
        storage::lock(self.queue.storage())?.record_job_run(run)?;
        Ok(())
    }
}
