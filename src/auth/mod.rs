//! Credential subsystem.
//!
//! # Data Flow
//! ```text
//! Executor attaches token → credentials.rs (CredentialSource::token)
//! 401 observed            → TokenManager::refresh (single-flight)
//!                         → CredentialSource::refresh_token
//! ```

pub mod credentials;

pub use credentials::{CredentialError, CredentialSource, NoCredentials, StaticCredentials, TokenManager};
