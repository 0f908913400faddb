//! State module for tracking job progress
//!
//! # Components
//!
//! - `JobStatus`: the lifecycle status of a job (pending, running, done, ...)
//! - `Job`: a queued unit of work together with its retry bookkeeping
//! - `JobRequest`: the immutable trigger payload a job was created from

mod job;
mod job_status;

// Re-export main types
pub use job::{Job, JobRequest, RetryState};
pub use job_status::JobStatus;
