//! Inter-page delay computation
//!
//! The limiter is a pure function of the job's configuration and the source's
//! request ceiling. It holds no state between jobs; the engine applies the
//! returned wait right before issuing the next page request.

use std::time::Duration;

/// Rate limit in effect for one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Static delay from the job's pagination config
    pub delay_ms: u64,

    /// Source-level ceiling, if the source declares one
    pub requests_per_minute: Option<u32>,
}

impl RateLimit {
    pub fn new(delay_ms: u64, requests_per_minute: Option<u32>) -> Self {
        Self {
            delay_ms,
            requests_per_minute,
        }
    }

    /// Wait to apply before requesting page `page_index` (zero-based)
    pub fn delay_before(&self, page_index: u32) -> Duration {
        page_delay(page_index, self.delay_ms, self.requests_per_minute)
    }
}

/// Calculates the wait before requesting page `page_index`
///
/// - The first page never waits.
/// - A source-level `requests_per_minute` ceiling takes priority over the
///   static delay and yields `60000 / requests_per_minute` milliseconds.
/// - Otherwise the static `delay_ms` applies.
pub fn page_delay(page_index: u32, delay_ms: u64, requests_per_minute: Option<u32>) -> Duration {
    if page_index == 0 {
        return Duration::ZERO;
    }

    match requests_per_minute {
        Some(rpm) if rpm > 0 => Duration::from_millis(60_000 / u64::from(rpm)),
        _ => Duration::from_millis(delay_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_page_never_waits() {
        assert_eq!(page_delay(0, 5000, None), Duration::ZERO);
        assert_eq!(page_delay(0, 5000, Some(1)), Duration::ZERO);
        assert_eq!(RateLimit::new(1000, Some(30)).delay_before(0), Duration::ZERO);
    }

    #[test]
    fn test_source_limit_takes_priority() {
        assert_eq!(page_delay(1, 0, Some(30)), Duration::from_millis(2000));
        assert_eq!(page_delay(3, 10_000, Some(60)), Duration::from_millis(1000));
    }

    #[test]
    fn test_static_delay_without_source_limit() {
        assert_eq!(page_delay(1, 1000, None), Duration::from_millis(1000));
        assert_eq!(page_delay(7, 0, None), Duration::ZERO);
    }

    #[test]
    fn test_zero_rpm_falls_back_to_delay() {
        assert_eq!(page_delay(1, 250, Some(0)), Duration::from_millis(250));
    }

    #[test]
    fn test_rate_limit_struct() {
        let limit = RateLimit::new(500, None);
        assert_eq!(limit.delay_before(1), Duration::from_millis(500));
        assert_eq!(limit.delay_before(2), Duration::from_millis(500));
    }
}
