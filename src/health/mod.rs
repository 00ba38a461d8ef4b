//! Health tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each service's health endpoint
//!     → Update state.rs
//!
//! Passive observation (client executor):
//!     Request outcome observed
//!     → Update state.rs
//!
//! Classification (state.rs):
//!     Unknown / Healthy / ColdStart / Degraded
//!     → consumed by the retry policy
//! ```
//!
//! # Design Decisions
//! - Health state is per-service
//! - Health checks never move a circuit breaker

pub mod active;
pub mod state;

pub use active::HealthMonitor;
pub use state::{HealthClassification, HealthSnapshot, HealthTracker, ServiceHealthRecord};
