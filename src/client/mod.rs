//! Client subsystem: the resilient request executor and its shared state.
//!
//! # Data Flow
//! ```text
//! Caller → executor.rs (ResilientClient::execute)
//!     → registry.rs (breaker per service, health tracker)
//!     → http::transport (dispatch)
//!     → offline::queue (when nothing answers)
//!     → events.rs (breaker transitions, queueing, drains)
//! ```

pub mod events;
pub mod executor;
pub mod registry;

pub use events::{EventBus, ServiceStatusEvent};
pub use executor::{ClientBuildError, ClientBuilder, ResilientClient};
pub use registry::{ServiceRegistry, ServiceStatus};
