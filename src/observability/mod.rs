//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Executor, breakers, health monitor, offline queue produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID appears on every log line of a request, across retries
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
