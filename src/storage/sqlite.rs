//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::idempotency::Reservation;
use crate::pagination::PageMetrics;
use crate::state::{Job, JobRequest, JobStatus};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    DeadLetterEntry, DeadLetterReason, DeadLetterRecord, JobResultRecord, JobRunRecord,
    PageMetricRecord, QueueStats,
};
use crate::IngestError;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;

const JOB_COLUMNS: &str = "id, request_json, request_fingerprint, content_fingerprint, status, \
     attempts, next_eligible_at, backoff_ms, lease_id, locked_until, last_error, \
     created_at, updated_at, started_at, completed_at";

const FINGERPRINT_RESERVED: &str = "reserved";
const FINGERPRINT_PROCESSED: &str = "processed";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(IngestError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, IngestError> {
        let conn = Connection::open(path)?;

        // WAL lets an operator CLI read while workers write
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, IngestError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn update_held_job(&self, sql: &str, job_id: &str, params: &[&dyn rusqlite::ToSql]) -> StorageResult<()> {
        let changed = self.conn.execute(sql, params)?;
        ensure_held(changed, job_id)
    }
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn conversion_error<E>(column: usize, error: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, error.into())
}

fn parse_timestamp(column: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn parse_optional_timestamp(
    column: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(column, v)).transpose()
}

fn parse_status(column: usize, value: String) -> rusqlite::Result<JobStatus> {
    JobStatus::from_db_string(&value)
        .ok_or_else(|| conversion_error(column, format!("unknown job status '{}'", value)))
}

fn ensure_held(changed: usize, job_id: &str) -> StorageResult<()> {
    if changed == 0 {
        return Err(StorageError::LeaseLost(job_id.to_string()));
    }
    Ok(())
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let request_json: String = row.get(1)?;
    let request: JobRequest =
        serde_json::from_str(&request_json).map_err(|e| conversion_error(1, e))?;

    Ok(Job {
        id: row.get(0)?,
        request,
        request_fingerprint: row.get(2)?,
        content_fingerprint: row.get(3)?,
        status: parse_status(4, row.get(4)?)?,
        attempts: row.get(5)?,
        next_eligible_at: from_millis(row.get(6)?),
        backoff_ms: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
        lease_id: row.get(8)?,
        locked_until: row.get::<_, Option<i64>>(9)?.map(from_millis),
        last_error: row.get(10)?,
        created_at: parse_timestamp(11, row.get(11)?)?,
        updated_at: parse_timestamp(12, row.get(12)?)?,
        started_at: parse_optional_timestamp(13, row.get(13)?)?,
        completed_at: parse_optional_timestamp(14, row.get(14)?)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Job Queue =====

    fn insert_job(&mut self, job: &Job) -> StorageResult<()> {
        let request_json = serde_json::to_string(&job.request)?;
        self.conn.execute(
            "INSERT INTO jobs (id, source_id, request_json, request_fingerprint, content_fingerprint,
             status, attempts, next_eligible_at, backoff_ms, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.id,
                job.source_id(),
                request_json,
                job.request_fingerprint,
                job.content_fingerprint,
                job.status.to_db_string(),
                job.attempts,
                job.next_eligible_at.timestamp_millis(),
                job.backoff_ms.map(|v| v as i64),
                job.last_error,
                timestamp(job.created_at),
                timestamp(job.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_job(&self, job_id: &str) -> StorageResult<Option<Job>> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    }

    fn claim_next_job(
        &mut self,
        now: DateTime<Utc>,
        visibility: Duration,
        lease_id: &str,
    ) -> StorageResult<Option<Job>> {
        let now_ms = now.timestamp_millis();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<String> = tx
            .query_row(
                "SELECT id FROM jobs
                 WHERE (status = ?1 AND next_eligible_at <= ?3)
                    OR (status = ?2 AND locked_until <= ?3)
                 ORDER BY next_eligible_at ASC, created_at ASC, rowid ASC
                 LIMIT 1",
                params![
                    JobStatus::Pending.to_db_string(),
                    JobStatus::Running.to_db_string(),
                    now_ms
                ],
                |row| row.get(0),
            )
            .optional()?;

        let Some(job_id) = candidate else {
            tx.commit()?;
            return Ok(None);
        };

        let now_str = timestamp(now);
        tx.execute(
            "UPDATE jobs SET status = ?1, lease_id = ?2, locked_until = ?3, started_at = ?4,
             updated_at = ?4 WHERE id = ?5",
            params![
                JobStatus::Running.to_db_string(),
                lease_id,
                (now + visibility).timestamp_millis(),
                now_str,
                job_id
            ],
        )?;

        let job = tx.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![job_id],
            job_from_row,
        )?;

        tx.commit()?;
        Ok(Some(job))
    }

    fn set_request_fingerprint(&mut self, job_id: &str, fingerprint: &str) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE jobs SET request_fingerprint = ?1 WHERE id = ?2",
            params![fingerprint, job_id],
        )?;
        if changed == 0 {
            return Err(StorageError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    fn renew_lease(
        &mut self,
        job_id: &str,
        lease_id: &str,
        locked_until: DateTime<Utc>,
    ) -> StorageResult<()> {
        // Claims replace lease_id under an immediate transaction, so a match
        // here means no other worker has taken the job over.
        self.update_held_job(
            "UPDATE jobs SET locked_until = ?1, updated_at = ?2
             WHERE id = ?3 AND lease_id = ?4 AND status = ?5",
            job_id,
            params![
                locked_until.timestamp_millis(),
                timestamp(Utc::now()),
                job_id,
                lease_id,
                JobStatus::Running.to_db_string()
            ],
        )
    }

    fn complete_job(
        &mut self,
        job_id: &str,
        lease_id: &str,
        content_fingerprint: Option<&str>,
    ) -> StorageResult<()> {
        let now = timestamp(Utc::now());
        self.update_held_job(
            "UPDATE jobs SET status = ?1, content_fingerprint = COALESCE(?2, content_fingerprint),
             lease_id = NULL, locked_until = NULL, completed_at = ?3, updated_at = ?3
             WHERE id = ?4 AND lease_id = ?5 AND status = ?6",
            job_id,
            params![
                JobStatus::Done.to_db_string(),
                content_fingerprint,
                now,
                job_id,
                lease_id,
                JobStatus::Running.to_db_string()
            ],
        )
    }

    fn reschedule_job(
        &mut self,
        job_id: &str,
        lease_id: &str,
        attempts: u32,
        next_eligible_at: DateTime<Utc>,
        backoff_ms: u64,
        error: &str,
    ) -> StorageResult<()> {
        let now = timestamp(Utc::now());
        self.update_held_job(
            "UPDATE jobs SET status = ?1, attempts = ?2, next_eligible_at = ?3, backoff_ms = ?4,
             last_error = ?5, lease_id = NULL, locked_until = NULL, updated_at = ?6
             WHERE id = ?7 AND lease_id = ?8 AND status = ?9",
            job_id,
            params![
                JobStatus::Pending.to_db_string(),
                attempts,
                next_eligible_at.timestamp_millis(),
                backoff_ms as i64,
                error,
                now,
                job_id,
                lease_id,
                JobStatus::Running.to_db_string()
            ],
        )
    }

    fn dead_letter_job(
        &mut self,
        job_id: &str,
        lease_id: &str,
        entry: &DeadLetterEntry,
    ) -> StorageResult<()> {
        let now = timestamp(Utc::now());
        let partial_records = if entry.partial_records.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&entry.partial_records)?)
        };

        let tx = self.conn.transaction()?;

        let changed = tx.execute(
            "UPDATE jobs SET status = ?1, attempts = ?2, last_error = ?3, lease_id = NULL,
             locked_until = NULL, completed_at = ?4, updated_at = ?4
             WHERE id = ?5 AND lease_id = ?6 AND status = ?7",
            params![
                JobStatus::DeadLettered.to_db_string(),
                entry.attempts,
                entry.last_error,
                now,
                job_id,
                lease_id,
                JobStatus::Running.to_db_string()
            ],
        )?;
        ensure_held(changed, job_id)?;

        tx.execute(
            "INSERT INTO dead_letters (job_id, reason, attempts, last_error, status_code,
             partial_records, partial_count, dead_lettered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job_id,
                entry.reason.to_db_string(),
                entry.attempts,
                entry.last_error,
                entry.status_code,
                partial_records,
                entry.partial_records.len() as i64,
                now
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn release_job(
        &mut self,
        job_id: &str,
        lease_id: &str,
        next_eligible_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.update_held_job(
            "UPDATE jobs SET status = ?1, lease_id = NULL, locked_until = NULL,
             next_eligible_at = ?2, updated_at = ?3
             WHERE id = ?4 AND lease_id = ?5 AND status = ?6",
            job_id,
            params![
                JobStatus::Pending.to_db_string(),
                next_eligible_at.timestamp_millis(),
                timestamp(Utc::now()),
                job_id,
                lease_id,
                JobStatus::Running.to_db_string()
            ],
        )
    }

    fn count_jobs_by_status(&self, status: JobStatus) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_unfinished_jobs(&self) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status IN (?1, ?2, ?3)",
            params![
                JobStatus::Pending.to_db_string(),
                JobStatus::Running.to_db_string(),
                JobStatus::Failed.to_db_string()
            ],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn purge_done_jobs(&mut self, before: DateTime<Utc>) -> StorageResult<u64> {
        let deleted = self.conn.execute(
            "DELETE FROM jobs WHERE status = ?1 AND completed_at < ?2",
            params![JobStatus::Done.to_db_string(), timestamp(before)],
        )?;
        Ok(deleted as u64)
    }

    // ===== Dead Letters =====

    fn list_dead_letters(&self) -> StorageResult<Vec<DeadLetterRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT d.id, d.job_id, j.source_id, d.reason, d.attempts, d.last_error,
             d.status_code, d.partial_count, d.dead_lettered_at
             FROM dead_letters d JOIN jobs j ON j.id = d.job_id
             WHERE d.requeued_at IS NULL
             ORDER BY d.id ASC",
        )?;

        let records = stmt
            .query_map([], |row| {
                let reason: String = row.get(3)?;
                Ok(DeadLetterRecord {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    source_id: row.get(2)?,
                    reason: DeadLetterReason::from_db_string(&reason).ok_or_else(|| {
                        conversion_error(3, format!("unknown dead-letter reason '{}'", reason))
                    })?,
                    attempts: row.get(4)?,
                    last_error: row.get(5)?,
                    status_code: row.get(6)?,
                    partial_record_count: row.get::<_, i64>(7)? as usize,
                    dead_lettered_at: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn requeue_dead_letter(&mut self, job_id: &str, now: DateTime<Utc>) -> StorageResult<bool> {
        let now_str = timestamp(now);
        let tx = self.conn.transaction()?;

        let changed = tx.execute(
            "UPDATE jobs SET status = ?1, attempts = 0, next_eligible_at = ?2, backoff_ms = NULL,
             completed_at = NULL, updated_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                JobStatus::Pending.to_db_string(),
                now.timestamp_millis(),
                now_str,
                job_id,
                JobStatus::DeadLettered.to_db_string()
            ],
        )?;

        if changed == 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE dead_letters SET requeued_at = ?1 WHERE job_id = ?2 AND requeued_at IS NULL",
            params![now_str, job_id],
        )?;

        // A partial result published at dead-letter time is superseded
        tx.execute("DELETE FROM job_results WHERE job_id = ?1", params![job_id])?;

        tx.commit()?;
        Ok(true)
    }

    // ===== Idempotency =====

    fn reserve_fingerprint(
        &mut self,
        fingerprint: &str,
        job_id: &str,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> StorageResult<Reservation> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(ttl) = ttl {
            tx.execute(
                "DELETE FROM fingerprints
                 WHERE fingerprint = ?1 AND state = ?2 AND processed_at < ?3",
                params![
                    fingerprint,
                    FINGERPRINT_PROCESSED,
                    (now - ttl).timestamp_millis()
                ],
            )?;
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO fingerprints (fingerprint, job_id, state, reserved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                fingerprint,
                job_id,
                FINGERPRINT_RESERVED,
                now.timestamp_millis()
            ],
        )?;

        let reservation = if inserted == 1 {
            Reservation::Reserved
        } else {
            let owner: String = tx.query_row(
                "SELECT job_id FROM fingerprints WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )?;
            if owner == job_id {
                Reservation::Reserved
            } else {
                Reservation::AlreadyProcessed { owner }
            }
        };

        tx.commit()?;
        Ok(reservation)
    }

    fn mark_fingerprint_processed(
        &mut self,
        fingerprint: &str,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE fingerprints SET state = ?1, processed_at = ?2
             WHERE fingerprint = ?3 AND job_id = ?4",
            params![
                FINGERPRINT_PROCESSED,
                now.timestamp_millis(),
                fingerprint,
                job_id
            ],
        )?;

        if changed == 0 {
            return Err(StorageError::Database(format!(
                "Fingerprint {} is not reserved by job {}",
                fingerprint, job_id
            )));
        }
        Ok(())
    }

    fn release_fingerprint(&mut self, fingerprint: &str, job_id: &str) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM fingerprints WHERE fingerprint = ?1 AND job_id = ?2",
            params![fingerprint, job_id],
        )?;
        Ok(())
    }

    fn purge_fingerprints(&mut self, before: DateTime<Utc>) -> StorageResult<u64> {
        let deleted = self.conn.execute(
            "DELETE FROM fingerprints WHERE state = ?1 AND processed_at < ?2",
            params![FINGERPRINT_PROCESSED, before.timestamp_millis()],
        )?;
        Ok(deleted as u64)
    }

    // ===== Audit =====

    fn record_job_run(&mut self, run: &JobRunRecord) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO job_runs (job_id, attempt, status, started_at, completed_at, error_message,
             pages_processed, records_fetched, execution_time_ms, terminal_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.job_id,
                run.attempt,
                run.status.to_db_string(),
                run.started_at,
                run.completed_at,
                run.error_message,
                run.pages_processed,
                run.records_fetched as i64,
                run.execution_time_ms as i64,
                run.terminal_reason
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn record_page_metrics(
        &mut self,
        job_id: &str,
        attempt: u32,
        pages: &[PageMetrics],
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO page_metrics (job_id, attempt, page_index, item_count, duration_ms,
                 status_code, url) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for page in pages {
                stmt.execute(params![
                    job_id,
                    attempt,
                    page.index,
                    page.item_count as i64,
                    page.duration.as_millis() as i64,
                    page.status_code,
                    page.url
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_job_runs(&self, job_id: &str) -> StorageResult<Vec<JobRunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT job_id, attempt, status, started_at, completed_at, error_message,
             pages_processed, records_fetched, execution_time_ms, terminal_reason
             FROM job_runs WHERE job_id = ?1 ORDER BY id ASC",
        )?;

        let runs = stmt
            .query_map(params![job_id], |row| {
                Ok(JobRunRecord {
                    job_id: row.get(0)?,
                    attempt: row.get(1)?,
                    status: parse_status(2, row.get(2)?)?,
                    started_at: row.get(3)?,
                    completed_at: row.get(4)?,
                    error_message: row.get(5)?,
                    pages_processed: row.get(6)?,
                    records_fetched: row.get::<_, i64>(7)? as u64,
                    execution_time_ms: row.get::<_, i64>(8)? as u64,
                    terminal_reason: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    fn get_page_metrics(&self, job_id: &str) -> StorageResult<Vec<PageMetricRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT job_id, attempt, page_index, item_count, duration_ms, status_code, url
             FROM page_metrics WHERE job_id = ?1 ORDER BY attempt ASC, page_index ASC",
        )?;

        let pages = stmt
            .query_map(params![job_id], |row| {
                Ok(PageMetricRecord {
                    job_id: row.get(0)?,
                    attempt: row.get(1)?,
                    page_index: row.get(2)?,
                    item_count: row.get::<_, i64>(3)? as u64,
                    duration_ms: row.get::<_, i64>(4)? as u64,
                    status_code: row.get(5)?,
                    url: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(pages)
    }

    // ===== Results Outbox =====

    fn insert_result(&mut self, result: &JobResultRecord) -> StorageResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO job_results (job_id, source_id, content_fingerprint,
             records_json, summary_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                result.job_id,
                result.source_id,
                result.content_fingerprint,
                result.records_json,
                result.summary_json,
                result.created_at
            ],
        )?;
        Ok(inserted == 1)
    }

    fn get_result(&self, job_id: &str) -> StorageResult<Option<JobResultRecord>> {
        let result = self
            .conn
            .query_row(
                "SELECT job_id, source_id, content_fingerprint, records_json, summary_json, created_at
                 FROM job_results WHERE job_id = ?1",
                params![job_id],
                |row| {
                    Ok(JobResultRecord {
                        job_id: row.get(0)?,
                        source_id: row.get(1)?,
                        content_fingerprint: row.get(2)?,
                        records_json: row.get(3)?,
                        summary_json: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    // ===== Statistics =====

    fn queue_stats(&self) -> StorageResult<QueueStats> {
        let mut stats = QueueStats::default();

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (status, count) = row?;
            let count = count as u64;
            match JobStatus::from_db_string(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::Running) => stats.running = count,
                Some(JobStatus::Failed) => stats.failed = count,
                Some(JobStatus::Done) => stats.done = count,
                Some(JobStatus::DeadLettered) => stats.dead_lettered = count,
                None => {}
            }
        }

        stats.fingerprints =
            self.conn
                .query_row("SELECT COUNT(*) FROM fingerprints", [], |row| {
                    row.get::<_, i64>(0)
                })? as u64;
        stats.results =
            self.conn
                .query_row("SELECT COUNT(*) FROM job_results", [], |row| {
                    row.get::<_, i64>(0)
                })? as u64;

        Ok(stats)
    }
}
