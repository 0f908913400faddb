use crate::fetch::FetchFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Why a fetch attempt stopped requesting pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalReason {
    /// A page returned no items
    StoppedEmpty,

    /// A page returned fewer items than requested
    StoppedPartial,

    /// The page cap was reached
    MaxPages,

    /// The source reported no further pages
    Exhausted,

    /// A page request failed; see [`FetchResult::failure`]
    Error,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoppedEmpty => "stopped-empty",
            Self::StoppedPartial => "stopped-partial",
            Self::MaxPages => "max-pages",
            Self::Exhausted => "exhausted",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing and size of one fetched page
#[derive(Debug, Clone, PartialEq)]
pub struct PageMetrics {
    /// Zero-based page index within the attempt
    pub index: u32,

    /// Raw item count extracted from the page
    pub item_count: usize,

    /// Wall time of the HTTP request, excluding rate-limit waits
    pub duration: Duration,

    pub status_code: u16,
    pub url: String,
}

/// A fetched item tagged with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub source_id: String,
    pub page_index: u32,

    /// Position of the item within its page
    pub position: usize,

    pub payload: Value,
}

/// Compact outcome of an attempt, as exposed to downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchSummary {
    pub pages_fetched: usize,
    pub total_records: usize,
    pub total_time_ms: u64,
    pub max_pages_reached: bool,
    pub terminal_reason: TerminalReason,
}

/// Everything one fetch attempt produced
///
/// A failed attempt still carries the pages and records fetched before the
/// failure, so the retry coordinator can decide what to do with them.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub pages: Vec<PageMetrics>,
    pub records: Vec<NormalizedRecord>,
    pub total_records: usize,
    pub elapsed: Duration,
    pub max_pages_reached: bool,
    pub terminal_reason: TerminalReason,

    /// Classified failure when `terminal_reason` is [`TerminalReason::Error`]
    pub failure: Option<FetchFailure>,
}

impl FetchResult {
    pub(crate) fn new() -> Self {
        Self {
            pages: Vec::new(),
            records: Vec::new(),
            total_records: 0,
            elapsed: Duration::ZERO,
            max_pages_reached: false,
            terminal_reason: TerminalReason::Exhausted,
            failure: None,
        }
    }

    /// Appends one page and its items, preserving page order
    pub(crate) fn push_page(&mut self, metrics: PageMetrics, source_id: &str, items: Vec<Value>) {
        let page_index = metrics.index;
        self.total_records += items.len();
        self.records
            .extend(items.into_iter().enumerate().map(|(position, payload)| {
                NormalizedRecord {
                    source_id: source_id.to_string(),
                    page_index,
                    position,
                    payload,
                }
            }));
        self.pages.push(metrics);
    }

    pub(crate) fn finish(mut self, reason: TerminalReason, elapsed: Duration) -> Self {
        self.terminal_reason = reason;
        self.max_pages_reached = reason == TerminalReason::MaxPages;
        self.elapsed = elapsed;
        self
    }

    pub(crate) fn fail(mut self, failure: FetchFailure, elapsed: Duration) -> Self {
        self.terminal_reason = TerminalReason::Error;
        self.failure = Some(failure);
        self.elapsed = elapsed;
        self
    }

    /// Returns true if the attempt ended without a failure
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages.len()
    }

    pub fn summary(&self) -> FetchSummary {
        FetchSummary {
            pages_fetched: self.pages.len(),
            total_records: self.total_records,
            total_time_ms: self.elapsed.as_millis() as u64,
            max_pages_reached: self.max_pages_reached,
            terminal_reason: self.terminal_reason,
        }
    }

    /// Item payloads in fetch order
    pub fn payloads(&self) -> impl Iterator<Item = &Value> {
        self.records.iter().map(|r| &r.payload)
    }
}
