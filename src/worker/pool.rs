//! Worker pool
//!
//! A fixed number of tokio tasks each pull one job at a time from the queue.
//! Outcomes travel over an mpsc channel to a collector task that owns the
//! statistics and logs progress. A maintenance task purges expired
//! fingerprints and old done jobs on an interval.
//!
//! Shutdown is cooperative: cancelling the token stops new claims, interrupts
//! in-flight fetches at their next page boundary and releases those jobs.

use crate::config::Config;
use crate::fetch::PageFetcher;
use crate::queue::JobQueue;
use crate::storage::{self, SharedStorage, Storage};
use crate::worker::{JobOutcome, JobProcessor, RecordSink, WorkerStats};
use crate::IngestError;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// When workers stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Wait for new jobs until shutdown
    Continuous,

    /// Exit once no pending, running or scheduled job is left
    Drain,
}

struct WorkerEvent {
    worker_id: usize,
    job_id: String,
    outcome: Option<JobOutcome>,
}

/// Bounded pool of job workers over one queue
pub struct WorkerPool {
    config: Arc<Config>,
    queue: JobQueue,
    processor: Arc<JobProcessor>,
}

impl WorkerPool {
    /// Creates a pool over shared storage
    ///
    /// # Arguments
    ///
    /// * `config` - Pipeline configuration
    /// * `storage` - The shared database holding the queue
    /// * `fetcher` - Issues page requests
    /// * `sink` - Receives successful results
    pub fn new(
        config: Arc<Config>,
        storage: SharedStorage,
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let queue = JobQueue::new(
            storage,
            Duration::from_secs(config.worker.visibility_timeout_secs),
            Duration::from_millis(config.worker.poll_interval_ms),
        );
        let processor = Arc::new(JobProcessor::new(
            config.clone(),
            queue.clone(),
            fetcher,
            sink,
        ));

        Self {
            config,
            queue,
            processor,
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Runs workers until shutdown (or until the queue drains)
    ///
    /// # Returns
    ///
    /// * `Ok(WorkerStats)` - Counters for every attempt handled by this run
    /// * `Err(IngestError)` - A worker task panicked
    pub async fn run(
        &self,
        cancel: CancellationToken,
        mode: RunMode,
    ) -> Result<WorkerStats, IngestError> {
        let concurrency = self.config.worker.concurrency as usize;
        tracing::info!(concurrency, ?mode, "Starting worker pool");

        let (tx, rx) = mpsc::channel::<WorkerEvent>(concurrency * 4);
        let collector = tokio::spawn(collect(rx));

        let workers: Vec<JoinHandle<()>> = (0..concurrency)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    queue: self.queue.clone(),
                    processor: self.processor.clone(),
                    events: tx.clone(),
                    poll_interval: Duration::from_millis(self.config.worker.poll_interval_ms),
                };
                tokio::spawn(worker.run(cancel.clone(), mode))
            })
            .collect();
        drop(tx);

        let maintenance_stop = cancel.child_token();
        let maintenance = tokio::spawn(maintenance_loop(
            self.config.clone(),
            self.queue.storage().clone(),
            self.processor.clone(),
            maintenance_stop.clone(),
        ));

        let mut panicked = 0;
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {}", e);
                panicked += 1;
            }
        }

        maintenance_stop.cancel();
        if let Err(e) = maintenance.await {
            tracing::error!("Maintenance task failed: {}", e);
        }

        let stats = collector.await.unwrap_or_default();

        tracing::info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            duplicates = stats.duplicates,
            deferred = stats.deferred,
            retried = stats.retried,
            dead_lettered = stats.dead_lettered,
            "Worker pool stopped"
        );

        if panicked > 0 {
            return Err(IngestError::Worker(format!(
                "{} worker task(s) panicked",
                panicked
            )));
        }

        Ok(stats)
    }
}

struct Worker {
    id: usize,
    queue: JobQueue,
    processor: Arc<JobProcessor>,
    events: mpsc::Sender<WorkerEvent>,
    poll_interval: Duration,
}

impl Worker {
    async fn run(self, cancel: CancellationToken, mode: RunMode) {
        tracing::debug!(worker_id = self.id, "Worker started");

        loop {
            let job = match self.next_job(&cancel, mode).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(worker_id = self.id, "Failed to claim job: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => continue,
                    }
                }
            };

            let outcome = match self.processor.process(&job, &cancel).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::error!(
                        worker_id = self.id,
                        job_id = %job.id,
                        "Job bookkeeping failed, leaving it for redelivery: {}",
                        e
                    );
                    None
                }
            };

            let event = WorkerEvent {
                worker_id: self.id,
                job_id: job.id.clone(),
                outcome,
            };
            if self.events.send(event).await.is_err() {
                break;
            }
        }

        tracing::debug!(worker_id = self.id, "Worker stopped");
    }

    async fn next_job(
        &self,
        cancel: &CancellationToken,
        mode: RunMode,
    ) -> Result<Option<crate::state::Job>, IngestError> {
        match mode {
            RunMode::Continuous => Ok(self.queue.dequeue(cancel).await?),
            RunMode::Drain => loop {
                if cancel.is_cancelled() {
                    return Ok(None);
                }
                if let Some(job) = self.queue.try_dequeue()? {
                    return Ok(Some(job));
                }
                // Running jobs may still fail and come back for a retry
                if !self.queue.has_unfinished()? {
                    return Ok(None);
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(None),
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            },
        }
    }
}

async fn collect(mut events: mpsc::Receiver<WorkerEvent>) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let started = Instant::now();

    while let Some(event) = events.recv().await {
        match &event.outcome {
            Some(outcome) => {
                tracing::debug!(
                    worker_id = event.worker_id,
                    job_id = %event.job_id,
                    ?outcome,
                    "Job attempt finished"
                );
                stats.record(outcome);
            }
            None => stats.record_error(),
        }

        // Progress reporting every 10 attempts
        if stats.processed > 0 && stats.processed % 10 == 0 && event.outcome.is_some() {
            let rate = stats.processed as f64 / started.elapsed().as_secs_f64().max(0.001);
            tracing::info!(
                "Progress: {} attempts, {} succeeded, {} retried, {} dead-lettered, {:.2} jobs/sec",
                stats.processed,
                stats.succeeded,
                stats.retried,
                stats.dead_lettered,
                rate
            );
        }
    }

    stats
}

async fn maintenance_loop(
    config: Arc<Config>,
    storage: SharedStorage,
    processor: Arc<JobProcessor>,
    stop: CancellationToken,
) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.worker.maintenance_interval_secs));

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match processor.idempotency().purge_expired() {
            Ok(0) => {}
            Ok(n) => tracing::info!("Purged {} expired fingerprints", n),
            Err(e) => tracing::warn!("Fingerprint purge failed: {}", e),
        }

        if config.worker.retention_hours > 0 {
            let cutoff = Utc::now() - chrono::Duration::hours(config.worker.retention_hours as i64);
            let purged = storage::lock(&storage).and_then(|mut s| s.purge_done_jobs(cutoff));
            match purged {
                Ok(0) => {}
                Ok(n) => tracing::info!("Purged {} done jobs past retention", n),
                Err(e) => tracing::warn!("Retention purge failed: {}", e),
            }
        }
    }
}
