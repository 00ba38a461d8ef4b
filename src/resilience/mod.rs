//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to a service:
//!     → circuit_breaker.rs (admit, or fail fast while open)
//!     → dispatch, bounded by the per-request timeout and cancel.rs
//!     → On failure: retries.rs (pick policy row), backoff.rs (delay for attempt n)
//!     → circuit_breaker.rs (track failures, open circuit if threshold exceeded)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Retry decisions depend on the error and on the service's health classification
//! - Circuit breaker prevents retry storms against a degraded service
//! - Breaker state is never held across an await point

pub mod backoff;
pub mod cancel;
pub mod circuit_breaker;
pub mod retries;

pub use cancel::CancelToken;
pub use circuit_breaker::{BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitState, Transition};
pub use retries::{select_retry, RetryDecision, RetryReason};
