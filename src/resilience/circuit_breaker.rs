//! Circuit breaker for destination protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: destination assumed down, requests fail fast
//! - Half-Open: testing if destination recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: first admission after recovery timeout
//! Half-Open → Closed: trial request succeeds
//! Half-Open → Open: trial request fails
//! ```
//!
//! # Design Decisions
//! - Per-destination circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single trial in Half-Open; concurrent callers are rejected until it resolves
//! - Failure count survives successes while Closed; it only resets on entering Closed

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding: 0 closed, 1 half-open, 2 open.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

/// A state change caused by a call into the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Point-in-time copy of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    /// Milliseconds since the last recorded failure.
    pub last_failure_ago_ms: Option<u64>,
    /// Milliseconds until a trial request will be admitted (Open only).
    pub next_attempt_in_ms: Option<u64>,
    pub trial_in_flight: bool,
}

/// Why admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    /// Time until the breaker admits a trial; `None` while a trial is in flight.
    pub retry_in: Option<Duration>,
}

/// Circuit breaker for a single destination.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: config.recovery_timeout(),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                next_attempt_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Whether a request may be attempted now.
    ///
    /// Admitting a Half-Open trial claims the single trial slot; the caller must
    /// report the outcome through [`on_success`](Self::on_success),
    /// [`on_failure`](Self::on_failure) or [`release_trial`](Self::release_trial).
    pub fn can_execute(&self) -> bool {
        self.admit_at(Instant::now()).0.is_ok()
    }

    pub fn can_execute_at(&self, now: Instant) -> bool {
        self.admit_at(now).0.is_ok()
    }

    /// Admission with an RAII permit that releases an unresolved trial on drop.
    pub fn try_acquire(self: &Arc<Self>) -> Result<(BreakerPermit, Option<Transition>), Rejected> {
        let (result, transition) = self.admit_at(Instant::now());
        result.map(|is_trial| {
            (
                BreakerPermit {
                    breaker: Arc::clone(self),
                    is_trial,
                    resolved: false,
                },
                transition,
            )
        })
    }

    /// Returns `Ok(is_trial)` or the rejection, plus any transition made.
    fn admit_at(&self, now: Instant) -> (Result<bool, Rejected>, Option<Transition>) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => (Ok(false), None),
            CircuitState::Open => {
                let next = inner.next_attempt_at.unwrap_or(now);
                if now >= next {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    (
                        Ok(true),
                        Some(Transition {
                            from: CircuitState::Open,
                            to: CircuitState::HalfOpen,
                        }),
                    )
                } else {
                    (
                        Err(Rejected {
                            retry_in: Some(next.saturating_duration_since(now)),
                        }),
                        None,
                    )
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    (Err(Rejected { retry_in: None }), None)
                } else {
                    inner.trial_in_flight = true;
                    (Ok(true), None)
                }
            }
        }
    }

    pub fn on_success(&self) -> Option<Transition> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.next_attempt_at = None;
                inner.trial_in_flight = false;
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Closed,
                })
            }
            // Closed keeps its count; a late success while Open changes nothing.
            CircuitState::Closed | CircuitState::Open => None,
        }
    }

    pub fn on_failure(&self) -> Option<Transition> {
        self.on_failure_at(Instant::now())
    }

    pub fn on_failure_at(&self, now: Instant) -> Option<Transition> {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(now);

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.next_attempt_at = Some(now + self.recovery_timeout);
                Some(Transition {
                    from: CircuitState::Closed,
                    to: CircuitState::Open,
                })
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.next_attempt_at = Some(now + self.recovery_timeout);
                inner.trial_in_flight = false;
                Some(Transition {
                    from: CircuitState::HalfOpen,
                    to: CircuitState::Open,
                })
            }
            _ => None,
        }
    }

    /// Give back an unresolved Half-Open trial slot.
    pub fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    /// Force the breaker closed with counters cleared.
    pub fn reset(&self) -> Option<Transition> {
        let mut inner = self.lock();
        let from = inner.state;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.next_attempt_at = None;
        inner.trial_in_flight = false;
        (from != CircuitState::Closed).then_some(Transition {
            from,
            to: CircuitState::Closed,
        })
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.failure_threshold,
            last_failure_ago_ms: inner
                .last_failure_at
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            next_attempt_in_ms: match inner.state {
                CircuitState::Open => inner
                    .next_attempt_at
                    .map(|t| t.saturating_duration_since(now).as_millis() as u64),
                _ => None,
            },
            trial_in_flight: inner.trial_in_flight,
        }
    }
}

/// A RAII guard for one admitted request.
///
/// Dropping an unresolved trial permit frees the Half-Open slot without
/// counting as success or failure.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    is_trial: bool,
    resolved: bool,
}

impl BreakerPermit {
    pub fn is_trial(&self) -> bool {
        self.is_trial
    }

    pub fn record_success(mut self) -> Option<Transition> {
        self.resolved = true;
        self.breaker.on_success()
    }

    pub fn record_failure(mut self) -> Option<Transition> {
        self.resolved = true;
        self.breaker.on_failure()
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.is_trial && !self.resolved {
            self.breaker.release_trial();
        }
    }
}
