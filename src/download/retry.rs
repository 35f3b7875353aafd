//! Bounded retry with fixed backoff for transient transfer failures.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying download errors and determining retry behavior.
//!
//! # Overview
//!
//! When a fetch fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - Failures that may succeed on a fresh attempt
//! - [`FailureType::Permanent`] - Failures that won't succeed regardless of retries
//!
//! The [`RetryPolicy`] then decides whether to retry based on failure type
//! and attempt count. Retries always re-request the same byte range and wait
//! a fixed backoff in between; the budget is finite so a dead server cannot
//! livelock a transfer.
//!
//! # Example
//!
//! ```
//! use isofetch_core::download::{
//!     DownloadError, RetryPolicy, RetryDecision, classify_error
//! };
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::unsupported_status("https://example.com/disk.iso", 503);
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::DownloadError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default fixed delay between attempts (1 second).
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Classification of download failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Failure that may succeed on a fresh attempt.
    ///
    /// Examples: stall timeout, 503, connection reset, corrupt gzip frame.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: redirect loop, disk full, invalid URL, cancellation.
    Permanent,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Retry budget with a fixed backoff.
///
/// # Default Values
///
/// - `max_retries`: 3 (so at most 4 attempts of the same range)
/// - `backoff`: 1 second
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    max_retries: u32,

    /// Delay between attempts.
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom settings.
    #[must_use]
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Creates a policy with a custom retry count, using the default backoff.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Returns the configured retry count.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the total attempt budget (initial attempt plus retries).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Returns the fixed delay between attempts.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(level = "trace", skip(self), fields(max_retries = self.max_retries))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts() {
            debug!(attempt, max = self.max_attempts(), "retry budget exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("retry budget ({}) exhausted", self.max_retries),
            };
        }

        RetryDecision::Retry {
            delay: self.backoff,
            attempt: attempt + 1,
        }
    }
}

/// Classifies a download error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | UnsupportedStatus (any) | Transient |
/// | ChunkTimeout | Transient |
/// | Network | Transient |
/// | DecodeFailure | Transient |
/// | IncompleteBody | Transient |
/// | TooManyRedirects | Permanent |
/// | WriteFailure | Permanent |
/// | RangeIgnored | Permanent (handled by single-stream fallback) |
/// | Cancelled | Permanent |
/// | everything else | Permanent |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error.root() {
        DownloadError::UnsupportedStatus { .. }
        | DownloadError::ChunkTimeout { .. }
        | DownloadError::Network { .. }
        | DownloadError::DecodeFailure { .. }
        | DownloadError::IncompleteBody { .. } => FailureType::Transient,

        _ => FailureType::Permanent,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.backoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_policy_with_max_retries_keeps_default_backoff() {
        let policy = RetryPolicy::with_max_retries(5);
        assert_eq!(policy.max_retries(), 5);
        assert_eq!(policy.backoff(), Duration::from_secs(1));
    }

    #[test]
    fn test_should_retry_transient_uses_fixed_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(250));
        for attempt in 1..=3 {
            assert_eq!(
                policy.should_retry(FailureType::Transient, attempt),
                RetryDecision::Retry {
                    delay: Duration::from_millis(250),
                    attempt: attempt + 1,
                }
            );
        }
    }

    #[test]
    fn test_should_retry_exhausted_after_budget() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Transient, 4);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_should_retry_zero_retries_never_retries() {
        let policy = RetryPolicy::with_max_retries(0);
        let decision = policy.should_retry(FailureType::Transient, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_should_retry_permanent_never_retries() {
        let policy = RetryPolicy::default();
        let RetryDecision::DoNotRetry { reason } = policy.should_retry(FailureType::Permanent, 1)
        else {
            panic!("permanent failures must not retry");
        };
        assert!(reason.contains("permanent"));
    }

    // ==================== classify_error Tests ====================

    #[test]
    fn test_classify_status_errors_are_transient() {
        for status in [404, 416, 500, 503] {
            let error = DownloadError::unsupported_status("https://example.com/a", status);
            assert_eq!(classify_error(&error), FailureType::Transient, "{status}");
        }
    }

    #[test]
    fn test_classify_timeout_and_short_body_are_transient() {
        assert_eq!(
            classify_error(&DownloadError::chunk_timeout("https://example.com/a")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&DownloadError::incomplete_body("https://example.com/a", 10, 3)),
            FailureType::Transient
        );
    }

    #[test]
    fn test_classify_redirects_and_writes_are_permanent() {
        assert_eq!(
            classify_error(&DownloadError::too_many_redirects("https://example.com/a")),
            FailureType::Permanent
        );
        let io_error = std::io::Error::other("disk full");
        assert_eq!(
            classify_error(&DownloadError::write_failure("/tmp/a", io_error)),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&DownloadError::Cancelled),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&DownloadError::range_ignored("https://example.com/a", 200)),
            FailureType::Permanent
        );
    }
}
