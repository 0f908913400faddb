/// Job status definitions for tracking ingestion progress
///
/// This module defines every status a job can be in while it moves through
/// the queue, and the transitions allowed between them.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current status of a job in the ingestion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    // ===== Active States =====
    /// Job is waiting in the queue (new, or scheduled for a retry)
    Pending,

    /// Job is held by a worker
    Running,

    /// An attempt failed; only recorded on per-attempt audit rows
    Failed,

    // ===== Terminal States =====
    /// Job completed successfully (or was a duplicate of completed work)
    Done,

    /// Job exhausted its retries or hit a non-retryable error
    DeadLettered,
}

impl JobStatus {
    /// Returns true if this is a terminal status (no further processing)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::DeadLettered)
    }

    /// Returns true if the job may still be picked up by a worker
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::Failed)
    }

    /// Checks whether a job in this status may move to `next`
    ///
    /// Terminal statuses are immutable, except that an operator may requeue
    /// a dead-lettered job back to `Pending`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Pending)
                | (Running, DeadLettered)
                | (Running, Running)
                | (Failed, Pending)
                | (Failed, DeadLettered)
                | (DeadLettered, Pending)
        )
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Done => "done",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "failed" => Some(Self::Failed),
            "done" => Some(Self::Done),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }

    /// Returns all possible job statuses
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Running,
            Self::Failed,
            Self::Done,
            Self::DeadLettered,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
