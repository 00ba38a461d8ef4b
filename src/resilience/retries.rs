//! Retry policy selection.
//!
//! # Policy table (first match wins)
//! ```text
//! 4xx except 401/408/429          → no retry
//! cold start or no response       → 5000ms, 6 retries, ×1.5
//! 5xx                             → 2000ms, 3 retries, ×2.0
//! 429                             → retry-after or 5000ms, 2 retries, ×1.0
//! anything else                   → no retry
//! ```
//!
//! # Design Decisions
//! - Pure function of (failure, health classification); nothing is stored
//! - Constants come from `RetryConfig`, defaults match the table above
//! - Delays are capped by `max_delay_ms`, including server-provided retry-after

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{Failure, FailureKind};
use crate::health::state::HealthClassification;
use crate::resilience::backoff::{apply_jitter, calculate_backoff};

/// Client errors that may still be retried by a later row.
const RETRYABLE_CLIENT_ERRORS: [u16; 3] = [401, 408, 429];

/// Which row of the table matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    NotRetryable,
    ColdStart,
    ServerError,
    RateLimited,
}

impl RetryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryReason::NotRetryable => "not_retryable",
            RetryReason::ColdStart => "cold_start",
            RetryReason::ServerError => "server_error",
            RetryReason::RateLimited => "rate_limited",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay: Duration,
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub reason: RetryReason,
}

impl RetryDecision {
    fn never() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
            max_retries: 0,
            backoff_multiplier: 1.0,
            reason: RetryReason::NotRetryable,
        }
    }

    /// Effective delay before retry number `retry_index` (0-indexed).
    pub fn delay_for(&self, retry_index: u32, max_delay: Duration) -> Duration {
        calculate_backoff(self.delay, self.backoff_multiplier, retry_index, max_delay)
    }
}

/// Decide whether and how to retry `failure`.
pub fn select_retry(failure: &Failure, health: HealthClassification, config: &RetryConfig) -> RetryDecision {
    if !config.enabled {
        return RetryDecision::never();
    }

    let status = failure.kind.status();

    if let Some(code) = status {
        if (400..500).contains(&code) && !RETRYABLE_CLIENT_ERRORS.contains(&code) {
            return RetryDecision::never();
        }
    }

    if health == HealthClassification::ColdStart || failure.kind == FailureKind::NoResponse {
        let rule = config.cold_start;
        return RetryDecision {
            should_retry: true,
            delay: Duration::from_millis(rule.delay_ms),
            max_retries: rule.max_retries,
            backoff_multiplier: rule.backoff_multiplier,
            reason: RetryReason::ColdStart,
        };
    }

    if failure.kind.is_service_fault() {
        let rule = config.server_error;
        return RetryDecision {
            should_retry: true,
            delay: Duration::from_millis(rule.delay_ms),
            max_retries: rule.max_retries,
            backoff_multiplier: rule.backoff_multiplier,
            reason: RetryReason::ServerError,
        };
    }

    if status == Some(429) {
        let rule = config.rate_limit;
        return RetryDecision {
            should_retry: true,
            delay: failure
                .retry_after
                .unwrap_or(Duration::from_millis(rule.default_delay_ms)),
            max_retries: rule.max_retries,
            backoff_multiplier: 1.0,
            reason: RetryReason::RateLimited,
        };
    }

    RetryDecision::never()
}

/// Sleep duration before retry `retry_index`, with cap and jitter applied.
pub fn retry_delay(decision: &RetryDecision, retry_index: u32, config: &RetryConfig) -> Duration {
    let capped = decision.delay_for(retry_index, Duration::from_millis(config.max_delay_ms));
    apply_jitter(capped, config.jitter_ratio)
}

/// Parse a `retry-after` header given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
