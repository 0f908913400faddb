use crate::fetch::Endpoint;
use crate::pagination::PaginationConfig;
use crate::state::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An ingestion request as received from a trigger
///
/// This is the immutable part of a job: which source it belongs to, which
/// endpoint to page through, and how to paginate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Identifier of the source this request belongs to
    pub source_id: String,

    /// The remote endpoint to fetch
    pub endpoint: Endpoint,

    /// How to walk the endpoint's pages
    pub pagination: PaginationConfig,
}

/// Retry bookkeeping for a job
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    /// Number of failed attempts so far
    pub attempts: u32,

    /// Earliest time the job may be picked up again
    pub next_eligible_at: DateTime<Utc>,

    /// Backoff interval applied after the last failure
    pub backoff_ms: Option<u64>,

    /// Whether the job has been moved to the dead-letter set
    pub dead_lettered: bool,
}

/// A unit of paginated-fetch work owned by the job queue
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub request: JobRequest,

    /// Fingerprint of the request payload, set on first processing
    pub request_fingerprint: Option<String>,

    /// Fingerprint of the fetched records, set after the first successful fetch
    pub content_fingerprint: Option<String>,

    pub status: JobStatus,
    pub attempts: u32,
    pub next_eligible_at: DateTime<Utc>,
    pub backoff_ms: Option<u64>,

    /// Lease held by the worker currently processing this job
    pub lease_id: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,

    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a new pending job for the given request
    pub fn new(request: JobRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            request,
            request_fingerprint: None,
            content_fingerprint: None,
            status: JobStatus::Pending,
            attempts: 0,
            next_eligible_at: now,
            backoff_ms: None,
            lease_id: None,
            locked_until: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Returns the source this job belongs to
    pub fn source_id(&self) -> &str {
        &self.request.source_id
    }

    /// Returns the attempt number the next run of this job will be
    pub fn next_attempt(&self) -> u32 {
        self.attempts + 1
    }

    /// Returns the retry bookkeeping for this job
    pub fn retry_state(&self) -> RetryState {
        RetryState {
            attempts: self.attempts,
            next_eligible_at: self.next_eligible_at,
            backoff_ms: self.backoff_ms,
            dead_lettered: self.status == JobStatus::DeadLettered,
        }
    }
}
