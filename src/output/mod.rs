//! Output module for operator-facing reports
//!
//! This module handles:
//! - Queue statistics
//! - Listing the dead-letter set
//! - Single-job status with its attempt and page history

pub mod stats;

pub use stats::{
    load_job_report, load_statistics, print_dead_letters, print_job_report, print_statistics,
    JobReport, PipelineStatistics,
};
