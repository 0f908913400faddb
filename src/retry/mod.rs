//! Retry and dead-letter decisions
//!
//! # Components
//!
//! - `RetryPolicy`: jittered exponential backoff and the attempt ceiling
//! - `RetryCoordinator`: maps a classified failure to retry, dead-letter or release

mod coordinator;
mod policy;

pub use coordinator::{RetryCoordinator, RetryDecision};
pub use policy::RetryPolicy;
