//! The fetch strategy engine
//!
//! Walks one job's pages strictly in sequence:
//!
//! 1. Wait out the rate limit for the page (never before the first page)
//! 2. Check for cancellation and the job deadline
//! 3. Issue the request and classify a non-2xx response as a failure
//! 4. Extract the page's items and record its metrics
//! 5. Evaluate stop conditions, then advance the cursor
//!
//! Stop conditions are evaluated in a fixed order: empty page, partial page,
//! exhausted source, page cap. Any failure aborts the walk immediately and the
//! pages fetched so far stay on the returned [`FetchResult`].

use crate::config::SourceEntry;
use crate::fetch::{Endpoint, FetchFailure, PageFetcher, PageRequest, PageResponse, RateLimit};
use crate::pagination::cursor::PageCursor;
use crate::pagination::extract::{extract_items, parse_body};
use crate::pagination::{FetchResult, PageMetrics, PaginationConfig, TerminalReason};
use crate::state::JobRequest;
use reqwest::{Method, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// What one attempt fetches, resolved against its source's settings
#[derive(Debug, Clone)]
pub struct FetchTarget<'a> {
    pub source_id: &'a str,
    pub endpoint: &'a Endpoint,
    pub pagination: &'a PaginationConfig,

    /// Source-level headers; endpoint headers win on conflict
    pub source_headers: Option<&'a BTreeMap<String, String>>,

    pub rate_limit: RateLimit,
}

impl<'a> FetchTarget<'a> {
    /// Resolves a job request against its (optional) declared source
    pub fn new(request: &'a JobRequest, source: Option<&'a SourceEntry>) -> Self {
        Self {
            source_id: &request.source_id,
            endpoint: &request.endpoint,
            pagination: &request.pagination,
            source_headers: source.map(|s| &s.headers),
            rate_limit: RateLimit::new(
                request.pagination.delay_ms,
                source.and_then(|s| s.requests_per_minute),
            ),
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut merged: BTreeMap<&str, &str> = BTreeMap::new();
        if let Some(source_headers) = self.source_headers {
            for (name, value) in source_headers {
                merged.insert(name, value);
            }
        }
        for (name, value) in &self.endpoint.headers {
            merged.insert(name, value);
        }
        merged
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Cancellation and deadline for one attempt
#[derive(Debug, Clone)]
pub struct RunControl {
    pub cancel: CancellationToken,

    /// Overall attempt deadline, independent of per-request timeouts
    pub deadline: Option<Instant>,
}

impl RunControl {
    pub fn new(cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    /// Returns the failure that ends the attempt, if it must stop now
    fn interrupted(&self) -> Option<FetchFailure> {
        if self.cancel.is_cancelled() {
            return Some(shutdown_failure());
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(deadline_failure()),
            _ => None,
        }
    }

    async fn deadline_elapsed(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    }

    /// Sleeps for `delay`, cut short by cancellation or the deadline
    async fn wait(&self, delay: Duration) -> Result<(), FetchFailure> {
        if delay.is_zero() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(shutdown_failure()),
            _ = self.deadline_elapsed() => Err(deadline_failure()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn shutdown_failure() -> FetchFailure {
    FetchFailure::cancelled("Shutdown requested")
}

fn deadline_failure() -> FetchFailure {
    FetchFailure::transient("Job deadline exceeded")
}

/// Executes pagination strategies against a [`PageFetcher`]
#[derive(Clone)]
pub struct FetchEngine {
    fetcher: Arc<dyn PageFetcher>,
}

impl FetchEngine {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetches every page of `target` until a stop condition fires
    ///
    /// # Arguments
    ///
    /// * `target` - The endpoint, pagination config and rate limit to use
    /// * `control` - Cancellation token and attempt deadline
    ///
    /// # Returns
    ///
    /// The accumulated [`FetchResult`]. Failures are reported on the result,
    /// never as an `Err`, so partial pages are always available to the caller.
    pub async fn run(&self, target: &FetchTarget<'_>, control: &RunControl) -> FetchResult {
        let started = Instant::now();
        let result = FetchResult::new();
        let config = target.pagination;

        if let Err(e) = config.validate() {
            return result.fail(FetchFailure::permanent(e.to_string()), started.elapsed());
        }

        let base = match Url::parse(&target.endpoint.url) {
            Ok(url) => url,
            Err(e) => {
                return result.fail(
                    FetchFailure::permanent(format!(
                        "Invalid endpoint URL '{}': {}",
                        target.endpoint.url, e
                    )),
                    started.elapsed(),
                )
            }
        };

        let method = match Method::from_bytes(target.endpoint.method.to_ascii_uppercase().as_bytes())
        {
            Ok(method) => method,
            Err(_) => {
                return result.fail(
                    FetchFailure::permanent(format!(
                        "Invalid HTTP method '{}'",
                        target.endpoint.method
                    )),
                    started.elapsed(),
                )
            }
        };

        self.walk(target, control, base, method, result, started)
            .await
    }

    async fn walk(
        &self,
        target: &FetchTarget<'_>,
        control: &RunControl,
        base: Url,
        method: Method,
        mut result: FetchResult,
        started: Instant,
    ) -> FetchResult {
        let config = target.pagination;
        let max_pages = config.effective_max_pages();
        let headers = target.headers();
        let mut cursor = PageCursor::initial(&config.strategy);
        let mut page_index: u32 = 0;

        loop {
            if let Err(failure) = control.wait(target.rate_limit.delay_before(page_index)).await {
                return result.fail(failure, started.elapsed());
            }
            if let Some(failure) = control.interrupted() {
                return result.fail(failure, started.elapsed());
            }

            let request = PageRequest {
                url: cursor.request_url(&base, config),
                method: method.clone(),
                headers: headers.clone(),
                auth: target.endpoint.auth.clone(),
            };

            let page_started = Instant::now();
            let response = match self.fetch_page(&request, control).await {
                Ok(response) => response,
                Err(failure) => {
                    warn!(
                        source_id = target.source_id,
                        page = page_index,
                        url = %request.url,
                        "Page fetch failed: {}",
                        failure
                    );
                    return result.fail(failure, started.elapsed());
                }
            };
            let duration = page_started.elapsed();

            let (items, body) = match read_page(&response, config) {
                Ok(page) => page,
                Err(failure) => {
                    warn!(
                        source_id = target.source_id,
                        page = page_index,
                        status = response.status,
                        "Page rejected: {}",
                        failure
                    );
                    return result.fail(failure, started.elapsed());
                }
            };
            let item_count = items.len();

            debug!(
                source_id = target.source_id,
                page = page_index,
                items = item_count,
                duration_ms = duration.as_millis() as u64,
                "Fetched page"
            );

            result.push_page(
                PageMetrics {
                    index: page_index,
                    item_count,
                    duration,
                    status_code: response.status,
                    url: request.url.to_string(),
                },
                target.source_id,
                items,
            );
            page_index += 1;

            if !config.strategy.is_paginated() {
                return result.finish(TerminalReason::Exhausted, started.elapsed());
            }

            if config.stop_on_empty && item_count == 0 {
                return result.finish(TerminalReason::StoppedEmpty, started.elapsed());
            }

            if config.stop_on_partial
                && config.strategy.is_count_based()
                && item_count < config.page_size as usize
            {
                return result.finish(TerminalReason::StoppedPartial, started.elapsed());
            }

            let next = match cursor.advance(config, &body, &response.headers, &response.url) {
                Some(next) => next,
                None => return result.finish(TerminalReason::Exhausted, started.elapsed()),
            };

            if page_index >= max_pages {
                debug!(
                    source_id = target.source_id,
                    max_pages, "Page cap reached with more pages available"
                );
                return result.finish(TerminalReason::MaxPages, started.elapsed());
            }

            cursor = next;
        }
    }

    /// Issues one request, raced against cancellation and the deadline
    async fn fetch_page(
        &self,
        request: &PageRequest,
        control: &RunControl,
    ) -> Result<PageResponse, FetchFailure> {
        tokio::select! {
            biased;
            _ = control.cancel.cancelled() => Err(shutdown_failure()),
            _ = control.deadline_elapsed() => Err(deadline_failure()),
            response = self.fetcher.fetch(request) => response,
        }
    }
}

/// Classifies the status and extracts the items of a response
fn read_page(
    response: &PageResponse,
    config: &PaginationConfig,
) -> Result<(Vec<serde_json::Value>, serde_json::Value), FetchFailure> {
    if !(200..300).contains(&response.status) {
        let status =
            StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Err(FetchFailure::from_status(
            status,
            &response.headers,
            response.url.as_str(),
        ));
    }

    let body = parse_body(&response.body, response.url.as_str())?;
    let items = extract_items(&body, config.items_pointer.as_deref())?;
    Ok((items, body))
}
