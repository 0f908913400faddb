//! Job queue module
//!
//! # Components
//!
//! - `JobQueue`: enqueue / dequeue / ack / nack over the durable `jobs` table
//! - `parse_triggers` / `load_triggers`: turn trigger JSON into job requests

mod job_queue;
mod trigger;

pub use job_queue::JobQueue;
pub use trigger::{load_triggers, parse_triggers};
