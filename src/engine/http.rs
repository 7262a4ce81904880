// ── vaultchat Engine: HTTP Client & Retry ──────────────────────────────────
//
// Shared reqwest client factory plus the retry schedule for non-streaming
// calls (memory extraction). Streaming chat is never retried: tokens may
// already have reached the user.
//
// A retry waits on the request's AbortSignal, so stopping a chat also stops
// an extraction that is backing off behind it.

use crate::atoms::constants::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use crate::engine::state::AbortSignal;
use reqwest::Client;
use std::time::Duration;

/// Longest server-requested wait honored from `Retry-After`.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Client with the engine's connect/request timeouts.
pub fn build_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
}

// ── Retry ──────────────────────────────────────────────────────────────────

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// Doubling backoff from `base` up to `cap`, spread ±25%.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy { max_retries: 2, base: Duration::from_secs(1), cap: Duration::from_secs(30) }
    }
}

impl RetryPolicy {
    /// Whether a failed `attempt` (0-based) may be retried.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Wait before retrying `attempt`. A longer server `Retry-After` wins.
    /// `spread` in [0, 1) picks the point inside the ±25% band.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>, spread: f64) -> Duration {
        let doubled = self.base.saturating_mul(1 << attempt.min(16)).min(self.cap);
        let wait = retry_after.map_or(doubled, |ra| ra.max(doubled));
        wait.mul_f64(0.75 + 0.5 * spread.clamp(0.0, 1.0))
    }

    /// Sleep out the delay for `attempt` unless `abort` fires first.
    /// Returns the delay slept, or `None` when aborted.
    pub async fn wait(&self, attempt: u32, retry_after: Option<Duration>, abort: &AbortSignal) -> Option<Duration> {
        let delay = self.delay(attempt, retry_after, random_spread());
        tokio::select! {
            biased;
            _ = abort.cancelled() => None,
            _ = tokio::time::sleep(delay) => Some(delay),
        }
    }
}

// v4 uuids carry 122 random bits; the low 32 are plenty for spreading retries.
fn random_spread() -> f64 {
    (uuid::Uuid::new_v4().as_u128() as u32) as f64 / (u32::MAX as f64 + 1.0)
}

/// `Retry-After` as whole seconds, capped. HTTP-dates are ignored and the
/// computed backoff applies.
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let secs = header_value.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

// ── Text helpers ───────────────────────────────────────────────────────────

/// Cut `s` to at most `max_bytes` without splitting a UTF-8 sequence.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for s in [429, 500, 502, 503, 504, 529] {
            assert!(is_retryable_status(s));
        }
        for s in [200, 400, 401, 403, 404] {
            assert!(!is_retryable_status(s));
        }
    }

    #[test]
    fn delay_doubles_within_band() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(0, None, 0.5), Duration::from_secs(1));
        assert_eq!(p.delay(2, None, 0.5), Duration::from_secs(4));
        assert_eq!(p.delay(0, None, 0.0), Duration::from_millis(750));
        assert_eq!(p.delay(20, None, 0.5), Duration::from_secs(30));
        assert!(p.delay(1, None, 0.999) < Duration::from_millis(2500));
    }

    #[test]
    fn longer_retry_after_wins() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(0, Some(Duration::from_secs(10)), 0.5), Duration::from_secs(10));
        assert_eq!(p.delay(3, Some(Duration::from_secs(1)), 0.5), Duration::from_secs(8));
    }

    #[test]
    fn attempts_are_bounded() {
        let p = RetryPolicy::default();
        assert!(p.allows(0) && p.allows(1));
        assert!(!p.allows(2));
    }

    #[test]
    fn spread_stays_in_unit_interval() {
        for _ in 0..100 {
            let s = random_spread();
            assert!((0.0..1.0).contains(&s));
        }
    }

    #[test]
    fn parse_retry_after_values() {
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("600"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn abort_cuts_the_wait_short() {
        let p = RetryPolicy { max_retries: 1, base: Duration::from_secs(30), cap: Duration::from_secs(30) };
        let abort = AbortSignal::new();
        let trip = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trip.abort();
        });
        let started = std::time::Instant::now();
        assert_eq!(p.wait(0, None, &abort).await, None);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn short_wait_completes() {
        let p = RetryPolicy { max_retries: 1, base: Duration::from_millis(10), cap: Duration::from_millis(10) };
        let slept = p.wait(0, None, &AbortSignal::new()).await;
        assert!(slept.is_some_and(|d| d <= Duration::from_millis(13)));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_utf8("hello", 10), "hello");
        assert_eq!(truncate_utf8("hello", 3), "hel");
        // "ồ" is three bytes
        assert_eq!(truncate_utf8("aồb", 2), "a");
    }

    #[test]
    fn client_builds() {
        let _ = build_client();
    }
}
