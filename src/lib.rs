//! Resilient request layer for calls to independently deployed backend services.
//!
//! Every outbound call goes through [`ResilientClient::execute`], which adds a
//! per-service circuit breaker, a retry policy driven by the failure kind and
//! the service's observed health, single-flight credential refresh on 401 and
//! an offline queue replayed when connectivity returns.
//!
//! # Example
//! ```no_run
//! use resilient_request::{ClientConfig, RequestDescriptor, ResilientClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ResilientClient::new(ClientConfig::default())?;
//! let response = client.execute("job", RequestDescriptor::get("/jobs")).await?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod offline;
pub mod resilience;

pub use client::{ResilientClient, ServiceStatus, ServiceStatusEvent};
pub use config::ClientConfig;
pub use error::{EnrichedError, ErrorKind};
pub use http::{RequestDescriptor, ServiceResponse};
pub use lifecycle::Shutdown;
pub use resilience::CancelToken;
