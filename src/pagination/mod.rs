//! Pagination module: the fetch strategy engine
//!
//! # Components
//!
//! - `PaginationConfig` / `PaginationStrategy`: per-job pagination settings
//! - `PageCursor`: closed sum type over strategy positions, one next-page
//!   contract for every strategy
//! - `FetchEngine`: walks a job's pages under its rate limit
//! - `FetchResult`: pages, normalized records and the terminal reason

mod config;
mod cursor;
mod engine;
mod extract;
mod link_header;
mod result;

use thiserror::Error;

pub use config::{
    PaginationConfig, PaginationStrategy, DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE, MAX_PAGES_CEILING,
};
pub use cursor::PageCursor;
pub use engine::{FetchEngine, FetchTarget, RunControl};
pub use extract::{extract_cursor, extract_items, parse_body};
pub use link_header::{find_link, parse_link_header, LinkValue};
pub use result::{FetchResult, FetchSummary, NormalizedRecord, PageMetrics, TerminalReason};

/// Errors in a job's pagination settings
#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("Invalid pagination config: {0}")]
    InvalidConfig(String),
}
