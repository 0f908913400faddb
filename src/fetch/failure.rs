//! Failure classification for page fetches
//!
//! Every way a page fetch can go wrong is turned into a [`FetchFailure`] value
//! here, at the edge of the fetch engine. Nothing downstream inspects raw HTTP
//! errors; the retry coordinator only looks at the [`FailureKind`].
//!
//! | Condition | Kind |
//! |-----------|------|
//! | HTTP 429 | RateLimited (honours `Retry-After`) |
//! | HTTP 5xx, 408 | Transient |
//! | Timeout, connection reset/refused | Transient |
//! | HTTP 401/403 | Permanent (authentication) |
//! | Other 4xx, unexpected 3xx | Permanent |
//! | Malformed pagination config or response body | Permanent |
//! | Shutdown signal | Cancelled |

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Retry class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worth retrying after a backoff
    Transient,

    /// HTTP 429; transient, but the server may dictate the wait
    RateLimited,

    /// Retrying cannot change the outcome
    Permanent,

    /// The attempt was aborted by shutdown, not by the source
    Cancelled,
}

impl FailureKind {
    /// Returns true if the coordinator should schedule another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// A classified failure of a single job attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub message: String,

    /// HTTP status code, when the failure came from a response
    pub status_code: Option<u16>,

    /// Server-requested wait before the next attempt
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl FetchFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Permanent, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, message)
    }

    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            retry_after: None,
        }
    }

    /// Classifies a non-2xx response
    pub fn from_status(status: StatusCode, headers: &HeaderMap, url: &str) -> Self {
        let code = status.as_u16();
        let kind = if status == StatusCode::TOO_MANY_REQUESTS {
            FailureKind::RateLimited
        } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        };

        let message = match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                format!("Authentication failed for {}: HTTP {}", url, code)
            }
            _ => format!("HTTP {} from {}", code, url),
        };

        let retry_after = if kind == FailureKind::RateLimited {
            headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()))
        } else {
            None
        };

        Self {
            kind,
            message,
            status_code: Some(code),
            retry_after,
        }
    }

    /// Classifies a transport-level error from the HTTP client
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_builder() {
            return Self::permanent(format!("Invalid request: {}", error));
        }
        if error.is_redirect() {
            return Self::permanent(format!("Redirect error: {}", error));
        }

        let message = if error.is_timeout() {
            "Request timeout".to_string()
        } else if error.is_connect() {
            format!("Connection failed: {}", error)
        } else {
            error.to_string()
        };

        let mut failure = Self::transient(message);
        failure.status_code = error.status().map(|s| s.as_u16());
        failure
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Parses a `Retry-After` header value
///
/// Accepts either a number of seconds or an HTTP date. Dates in the past
/// yield a zero wait.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = date.with_timezone(&Utc) - now;
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
