use crate::worker::JobOutcome;
use serde::Serialize;

/// Counters for the jobs handled by this process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Attempts that reached a recorded outcome
    pub processed: u64,
    pub succeeded: u64,
    pub duplicates: u64,

    /// Duplicates sent back to wait for their owner
    pub deferred: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub released: u64,

    /// Attempts whose bookkeeping failed (left for redelivery)
    pub errors: u64,

    /// Records persisted by successful jobs
    pub records: u64,
}

impl WorkerStats {
    pub fn record(&mut self, outcome: &JobOutcome) {
        self.processed += 1;
        match outcome {
            JobOutcome::Succeeded { records, .. } => {
                self.succeeded += 1;
                self.records += *records as u64;
            }
            JobOutcome::Duplicate { .. } => self.duplicates += 1,
            JobOutcome::Deferred { .. } => self.deferred += 1,
            JobOutcome::Retried { .. } => self.retried += 1,
            JobOutcome::DeadLettered { .. } => self.dead_lettered += 1,
            JobOutcome::Released => self.released += 1,
        }
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }
}
