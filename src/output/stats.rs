//! Statistics and inspection reports from the pipeline database
//!
//! This module provides functionality for extracting and displaying queue
//! statistics, the dead-letter set and single-job histories.

use crate::state::Job;
use crate::storage::{DeadLetterRecord, JobRunRecord, PageMetricRecord, QueueStats, Storage};
use crate::IngestError;

/// Pipeline statistics summary
#[derive(Debug, Clone)]
pub struct PipelineStatistics {
    /// Job counts per status plus fingerprint and result counts
    pub queue: QueueStats,

    /// Dead-lettered jobs still awaiting remediation
    pub dead_letters: Vec<DeadLetterRecord>,
}

/// One job with its audit trail
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: Job,
    pub runs: Vec<JobRunRecord>,
    pub pages: Vec<PageMetricRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(PipelineStatistics)` - Successfully loaded statistics
/// * `Err(IngestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<PipelineStatistics, IngestError> {
    Ok(PipelineStatistics {
        queue: storage.queue_stats()?,
        dead_letters: storage.list_dead_letters()?,
    })
}

/// Loads a job and its audit trail
///
/// # Returns
///
/// * `Ok(JobReport)` - The job exists
/// * `Err(IngestError::JobNotFound)` - No job has this id
pub fn load_job_report(storage: &dyn Storage, job_id: &str) -> Result<JobReport, IngestError> {
    let job = storage
        .get_job(job_id)?
        .ok_or_else(|| IngestError::JobNotFound(job_id.to_string()))?;

    Ok(JobReport {
        runs: storage.get_job_runs(job_id)?,
        pages: storage.get_page_metrics(job_id)?,
        job,
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &PipelineStatistics) {
    let queue = &stats.queue;
    let total = queue.total_jobs();

    println!("=== Pipeline Statistics ===\n");

    println!("Jobs by Status:");
    for (label, count) in [
        ("pending", queue.pending),
        ("running", queue.running),
        ("failed", queue.failed),
        ("done", queue.done),
        ("dead_lettered", queue.dead_lettered),
    ] {
        let percentage = if total > 0 {
            (count as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", label, count, percentage);
    }
    println!("  total: {}", total);
    println!();

    println!("Idempotency:");
    println!("  Fingerprints held: {}", queue.fingerprints);
    println!("  Published results: {}", queue.results);
    println!();

    if !stats.dead_letters.is_empty() {
        println!("Dead Letters ({}):", stats.dead_letters.len());
        for letter in &stats.dead_letters {
            println!(
                "  - {} [{}] {} attempts: {}",
                letter.job_id,
                letter.reason.to_db_string(),
                letter.attempts,
                letter.last_error
            );
        }
        println!();
    }

    let finished = queue.done + queue.dead_lettered;
    let success_rate = if finished > 0 {
        (queue.done as f64 / finished as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} finished jobs done)",
        success_rate, queue.done, finished
    );
}

/// Prints the dead-letter set
pub fn print_dead_letters(letters: &[DeadLetterRecord]) {
    if letters.is_empty() {
        println!("No dead-lettered jobs");
        return;
    }

    println!("=== Dead Letters ({}) ===\n", letters.len());
    for letter in letters {
        println!("Job {}", letter.job_id);
        println!("  Source: {}", letter.source_id);
        println!("  Reason: {}", letter.reason.to_db_string());
        println!("  Attempts: {}", letter.attempts);
        if let Some(code) = letter.status_code {
            println!("  HTTP status: {}", code);
        }
        println!("  Last error: {}", letter.last_error);
        println!("  Partial records kept: {}", letter.partial_record_count);
        println!("  Dead-lettered at: {}", letter.dead_lettered_at);
        println!();
    }
}

/// Prints one job and its attempts
pub fn print_job_report(report: &JobReport) {
    let job = &report.job;

    println!("=== Job {} ===\n", job.id);
    println!("  Source: {}", job.source_id());
    println!("  Endpoint: {} {}", job.request.endpoint.method, job.request.endpoint.url);
    println!("  Strategy: {}", job.request.pagination.strategy.name());
    println!("  Status: {}", job.status.to_db_string());
    let retry = job.retry_state();
    println!("  Attempts: {}", retry.attempts);
    if job.status.is_active() && retry.attempts > 0 {
        println!("  Next eligible at: {}", retry.next_eligible_at.to_rfc3339());
        if let Some(backoff) = retry.backoff_ms {
            println!("  Last backoff: {}ms", backoff);
        }
    }
    if retry.dead_lettered {
        println!("  Dead-lettered: use --requeue {} to retry", job.id);
    }
    if let Some(error) = &job.last_error {
        println!("  Last error: {}", error);
    }
    if let Some(fp) = &job.content_fingerprint {
        println!("  Content fingerprint: {}", fp);
    }
    println!();

    if report.runs.is_empty() {
        println!("No attempts recorded");
        return;
    }

    println!("Attempts:");
    for run in &report.runs {
        println!(
            "  #{} {} pages={} records={} time={}ms reason={}{}",
            run.attempt,
            run.status.to_db_string(),
            run.pages_processed,
            run.records_fetched,
            run.execution_time_ms,
            run.terminal_reason.as_deref().unwrap_or("-"),
            run.error_message
                .as_deref()
                .map(|e| format!(" error=\"{}\"", e))
                .unwrap_or_default()
        );

        for page in report.pages.iter().filter(|p| p.attempt == run.attempt) {
            println!(
                "      page {} HTTP {} items={} {}ms {}",
                page.page_index, page.status_code, page.item_count, page.duration_ms, page.url
            );
        }
    }
}
