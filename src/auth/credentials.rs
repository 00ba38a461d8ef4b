//! Bearer credentials and single-flight refresh.
//!
//! # Responsibilities
//! - Read the current token from an external credential store
//! - Refresh it on 401, issuing at most one refresh call at a time
//!
//! # Design Decisions
//! - Concurrent 401s await the same shared refresh future
//! - The in-flight slot is cleared by whichever waiter finishes first;
//!   a generation counter prevents clearing a newer refresh

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no refresh credential available")]
    NoRefreshToken,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// External credential store.
pub trait CredentialSource: Send + Sync + 'static {
    /// Current bearer token, if signed in.
    fn token(&self) -> Option<String>;

    /// Obtain (and store) a new token.
    fn refresh_token(&self) -> BoxFuture<'static, Result<String, CredentialError>>;
}

/// No credentials at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCredentials;

impl CredentialSource for NoCredentials {
    fn token(&self) -> Option<String> {
        None
    }

    fn refresh_token(&self) -> BoxFuture<'static, Result<String, CredentialError>> {
        Box::pin(async { Err(CredentialError::NoRefreshToken) })
    }
}

/// A fixed token that cannot be refreshed (CLI, tests).
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: Option<String>) {
        *self.token.write().expect("credential lock poisoned") = token;
    }
}

impl CredentialSource for StaticCredentials {
    fn token(&self) -> Option<String> {
        self.token.read().expect("credential lock poisoned").clone()
    }

    fn refresh_token(&self) -> BoxFuture<'static, Result<String, CredentialError>> {
        Box::pin(async { Err(CredentialError::NoRefreshToken) })
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<String, CredentialError>>>;

/// Wraps a [`CredentialSource`] with refresh de-duplication.
pub struct TokenManager {
    source: Arc<dyn CredentialSource>,
    in_flight: Mutex<Option<(u64, SharedRefresh)>>,
    generation: AtomicU64,
}

impl TokenManager {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.source.token()
    }

    /// Refresh the token, joining an already running refresh if there is one.
    pub async fn refresh(&self) -> Result<String, CredentialError> {
        let (generation, fut) = {
            let mut slot = self.in_flight.lock().expect("token refresh mutex poisoned");
            match slot.as_ref() {
                Some((generation, fut)) => {
                    tracing::debug!(generation, "Joining in-flight token refresh");
                    (*generation, fut.clone())
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::info!(generation, "Refreshing bearer token");
                    let fut = self.source.refresh_token().shared();
                    *slot = Some((generation, fut.clone()));
                    (generation, fut)
                }
            }
        };

        let result = fut.await;

        let mut slot = self.in_flight.lock().expect("token refresh mutex poisoned");
        if matches!(slot.as_ref(), Some((g, _)) if *g == generation) {
            *slot = None;
        }
        drop(slot);

        if let Err(e) = &result {
            tracing::warn!(error = %e, "Token refresh failed");
        }
        result
    }

    /// Number of refreshes started so far.
    pub fn refresh_count(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("has_token", &self.source.token().is_some())
            .field("refresh_count", &self.refresh_count())
            .finish()
    }
}
