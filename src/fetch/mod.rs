//! Fetch module for issuing page requests
//!
//! This module contains everything that touches the network, including:
//! - The endpoint descriptor and its authentication schemes
//! - The `PageFetcher` trait and its reqwest-backed implementation
//! - Failure classification (transient / rate-limited / permanent)
//! - Inter-page rate limiting

mod endpoint;
mod failure;
mod http;
mod rate_limit;

pub use endpoint::{Auth, Endpoint};
pub use failure::{parse_retry_after, FailureKind, FetchFailure};
pub use http::{build_http_client, HttpPageFetcher, PageFetcher, PageRequest, PageResponse};
pub use rate_limit::{page_delay, RateLimit};
