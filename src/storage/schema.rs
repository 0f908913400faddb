//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Sumi-Ingest database.
//! Scheduling columns (`next_eligible_at`, `locked_until`, fingerprint times)
//! are Unix milliseconds so they compare as integers; audit timestamps are
//! RFC 3339 text.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Durable job queue and staging record
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    request_json TEXT NOT NULL,
    request_fingerprint TEXT,
    content_fingerprint TEXT,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    next_eligible_at INTEGER NOT NULL,
    backoff_ms INTEGER,
    lease_id TEXT,
    locked_until INTEGER,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(status, next_eligible_at);
CREATE INDEX IF NOT EXISTS idx_jobs_source ON jobs(source_id);

-- Jobs isolated after permanent or repeated failure
CREATE TABLE IF NOT EXISTS dead_letters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    reason TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    last_error TEXT NOT NULL,
    status_code INTEGER,
    partial_records TEXT,
    partial_count INTEGER NOT NULL DEFAULT 0,
    dead_lettered_at TEXT NOT NULL,
    requeued_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_dead_letters_job ON dead_letters(job_id);

-- Idempotency reservations; the primary key is the atomic check-and-set
CREATE TABLE IF NOT EXISTS fingerprints (
    fingerprint TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    state TEXT NOT NULL,
    reserved_at INTEGER NOT NULL,
    processed_at INTEGER
);

-- One row per job attempt
CREATE TABLE IF NOT EXISTS job_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    error_message TEXT,
    pages_processed INTEGER NOT NULL DEFAULT 0,
    records_fetched INTEGER NOT NULL DEFAULT 0,
    execution_time_ms INTEGER NOT NULL DEFAULT 0,
    terminal_reason TEXT
);

CREATE INDEX IF NOT EXISTS idx_job_runs_job ON job_runs(job_id);

-- One row per fetched page
CREATE TABLE IF NOT EXISTS page_metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    page_index INTEGER NOT NULL,
    item_count INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    status_code INTEGER NOT NULL,
    url TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_page_metrics_job ON page_metrics(job_id);

-- Results outbox read by downstream consumers
CREATE TABLE IF NOT EXISTS job_results (
    job_id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    content_fingerprint TEXT,
    records_json TEXT NOT NULL,
    summary_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
