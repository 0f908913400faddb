//! Downstream persistence of fetched records

use crate::pagination::{FetchSummary, NormalizedRecord};
use crate::storage::{self, JobResultRecord, SharedStorage, Storage, StorageError};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use thiserror::Error;

/// Errors raised while handing records downstream
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sink rejected batch: {0}")]
    Rejected(String),
}

/// One job's records on their way downstream
#[derive(Debug, Clone, Copy)]
pub struct RecordBatch<'a> {
    pub job_id: &'a str,
    pub source_id: &'a str,
    pub content_fingerprint: Option<&'a str>,
    pub records: &'a [NormalizedRecord],
    pub summary: &'a FetchSummary,
}

/// Where successful results go
///
/// The worker only calls `persist` after winning the content fingerprint
/// reservation and renewing its lease, so a sink sees each distinct payload
/// at most once per TTL window and never from a holder whose lease was taken
/// over. Implementations must still tolerate a repeat for the same job,
/// since a crash between persist and ack redelivers the job.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persists a batch
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The batch was written
    /// * `Ok(false)` - The batch for this job was already present
    /// * `Err(SinkError)` - The write failed; the attempt is retried
    async fn persist(&self, batch: &RecordBatch<'_>) -> Result<bool, SinkError>;
}

/// Writes batches to the `job_results` outbox table
#[derive(Clone)]
pub struct OutboxSink {
    storage: SharedStorage,
}

impl OutboxSink {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl RecordSink for OutboxSink {
    async fn persist(&self, batch: &RecordBatch<'_>) -> Result<bool, SinkError> {
        let record = JobResultRecord {
            job_id: batch.job_id.to_string(),
            source_id: batch.source_id.to_string(),
            content_fingerprint: batch.content_fingerprint.map(str::to_string),
            records_json: serde_json::to_string(batch.records)?,
            summary_json: serde_json::to_string(batch.summary)?,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        let inserted = storage::lock(&self.storage)?.insert_result(&record)?;
        if !inserted {
            tracing::debug!(job_id = batch.job_id, "Result already in outbox");
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::TerminalReason;
    use crate::storage::SqliteStorage;
    use serde_json::json;

    #[tokio::test]
    async fn test_outbox_sink_writes_once() {
        let storage = storage::shared(SqliteStorage::new_in_memory().unwrap());
        let sink = OutboxSink::new(storage.clone());

        let records = vec![NormalizedRecord {
            source_id: "src".to_string(),
            page_index: 0,
            position: 0,
            payload: json!({ "id": 1 }),
        }];
        let summary = FetchSummary {
            pages_fetched: 1,
            total_records: 1,
            total_time_ms: 12,
            max_pages_reached: false,
            terminal_reason: TerminalReason::Exhausted,
        };
        let batch = RecordBatch {
            job_id: "job",
            source_id: "src",
            content_fingerprint: Some("content:abc"),
            records: &records,
            summary: &summary,
        };

        assert!(sink.persist(&batch).await.unwrap());
        assert!(!sink.persist(&batch).await.unwrap());

        let stored = storage::lock(&storage)
            .unwrap()
            .get_result("job")
            .unwrap()
            .unwrap();
        let decoded: Vec<NormalizedRecord> = serde_json::from_str(&stored.records_json).unwrap();
        assert_eq!(decoded, records);
        let summary_back: FetchSummary = serde_json::from_str(&stored.summary_json).unwrap();
        assert_eq!(summary_back.terminal_reason, TerminalReason::Exhausted);
    }
}
