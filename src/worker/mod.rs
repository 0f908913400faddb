//! Worker module
//!
//! This module turns queued jobs into persisted results:
//! - `JobProcessor`: one attempt of one job, from fingerprint to ack
//! - `WorkerPool`: bounded tokio tasks, outcome channel and maintenance
//! - `RecordSink` / `OutboxSink`: the downstream persistence collaborator
//! - `WorkerStats`: per-process counters

mod pipeline;
mod pool;
mod sink;
mod stats;

pub use pipeline::{JobOutcome, JobProcessor};
pub use pool::{RunMode, WorkerPool};
pub use sink::{OutboxSink, RecordBatch, RecordSink, SinkError};
pub use stats::WorkerStats;
