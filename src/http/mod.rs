//! Outbound HTTP subsystem.
//!
//! # Data Flow
//! ```text
//! RequestDescriptor (method, path, body)
//!     → request.rs (resolve URL against service base, add headers)
//!     → transport.rs (send with timeout)
//!     → response.rs (status, headers, buffered body)
//! ```

pub mod request;
pub mod response;
pub mod transport;

pub use request::{PreparedRequest, RequestDescriptor, RequestId, X_REQUEST_ID};
pub use response::ServiceResponse;
pub use transport::{HttpTransport, Transport, TransportError};
