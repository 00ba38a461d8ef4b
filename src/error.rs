//! Error taxonomy surfaced to callers.
//!
//! Every error leaving [`ResilientClient::execute`](crate::client::ResilientClient::execute)
//! is an [`EnrichedError`]: the technical cause plus a category, a severity and a
//! user-facing message, so UI layers need no per-call error handling.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

/// How a single attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "status", rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeout, refused connection, abort: nothing came back.
    NoResponse,
    /// The service answered with an error status.
    Status(u16),
}

impl FailureKind {
    pub fn is_no_response(&self) -> bool {
        matches!(self, FailureKind::NoResponse)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FailureKind::Status(code) => Some(*code),
            FailureKind::NoResponse => None,
        }
    }

    /// 5xx or no response: the failures that count against a breaker.
    pub fn is_service_fault(&self) -> bool {
        match self {
            FailureKind::NoResponse => true,
            FailureKind::Status(code) => *code >= 500,
        }
    }
}

/// One failed attempt, as seen by the retry policy and the health tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: FailureKind,
    /// Parsed `retry-after` header (seconds), if any.
    pub retry_after: Option<Duration>,
    /// Technical description.
    pub message: String,
}

impl Failure {
    pub fn no_response(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::NoResponse,
            retry_after: None,
            message: message.into(),
        }
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Status(code),
            retry_after: None,
            message: message.into(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

/// Error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Breaker is blocking; no request was sent.
    CircuitOpen,
    /// 401 after the refresh attempt failed or was not possible.
    AuthExpired,
    /// 4xx other than 401/429; never retried.
    Validation,
    /// 5xx or no response, retries exhausted.
    TransientServer,
    /// 429, retries exhausted.
    RateLimited,
    /// No network; the request has been queued for replay.
    Offline,
    /// The caller cancelled the request.
    Cancelled,
    /// The service name is not configured.
    UnknownService,
    /// The request could not be built (bad URL, bad header).
    InvalidRequest,
}

/// Observability category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    NotFound,
    ServerError,
    Network,
    ClientError,
    CircuitOpen,
    Cancelled,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::Network => "network",
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Cancelled => "cancelled",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ErrorCategory::Authentication => Severity::High,
            ErrorCategory::NotFound => Severity::Low,
            ErrorCategory::ServerError => Severity::Critical,
            ErrorCategory::Network => Severity::Medium,
            ErrorCategory::ClientError => Severity::Low,
            ErrorCategory::CircuitOpen => Severity::Medium,
            ErrorCategory::Cancelled => Severity::Low,
        }
    }

    /// Category of an attempt failure.
    pub fn of(kind: FailureKind) -> Self {
        match kind {
            FailureKind::NoResponse => ErrorCategory::Network,
            FailureKind::Status(401) | FailureKind::Status(403) => ErrorCategory::Authentication,
            FailureKind::Status(404) => ErrorCategory::NotFound,
            FailureKind::Status(code) if code >= 500 => ErrorCategory::ServerError,
            FailureKind::Status(_) => ErrorCategory::ClientError,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Error surfaced to callers of the executor.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{service}: {message}")]
pub struct EnrichedError {
    pub kind: ErrorKind,
    pub service: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Technical description.
    pub message: String,
    /// Message safe to show to an end user.
    pub user_message: String,
    /// HTTP status of the last attempt, if one came back.
    pub status: Option<u16>,
    pub retryable: bool,
    pub severity: Severity,
    pub category: ErrorCategory,
    /// Dispatches performed for this request.
    pub attempts: u32,
    /// The request sits in the offline queue.
    pub queued: bool,
    pub request_id: Option<String>,
}

impl EnrichedError {
    fn new(kind: ErrorKind, category: ErrorCategory, service: &str, message: String, user_message: String) -> Self {
        Self {
            kind,
            service: service.to_string(),
            timestamp_ms: now_millis(),
            message,
            user_message,
            status: None,
            retryable: matches!(
                kind,
                ErrorKind::CircuitOpen | ErrorKind::TransientServer | ErrorKind::RateLimited | ErrorKind::Offline
            ),
            severity: category.severity(),
            category,
            attempts: 0,
            queued: false,
            request_id: None,
        }
    }

    /// Build the final error for a request whose last attempt failed.
    ///
    /// `cold_start` selects the start-up wording for service faults.
    pub fn from_failure(service: &str, failure: &Failure, queued: bool, cold_start: bool) -> Self {
        let kind = match failure.kind {
            FailureKind::NoResponse if queued => ErrorKind::Offline,
            FailureKind::NoResponse => ErrorKind::TransientServer,
            FailureKind::Status(401) => ErrorKind::AuthExpired,
            FailureKind::Status(429) => ErrorKind::RateLimited,
            FailureKind::Status(code) if code >= 500 => ErrorKind::TransientServer,
            FailureKind::Status(_) => ErrorKind::Validation,
        };
        let category = ErrorCategory::of(failure.kind);
        let user_message = user_message_for(service, kind, failure.kind, cold_start);

        let mut err = Self::new(kind, category, service, failure.message.clone(), user_message);
        err.status = failure.kind.status();
        err.queued = queued;
        err
    }

    pub fn circuit_open(service: &str, retry_in: Option<Duration>) -> Self {
        let message = match retry_in {
            Some(d) => format!("circuit breaker open, next attempt in {}ms", d.as_millis()),
            None => "circuit breaker open, trial request in flight".to_string(),
        };
        Self::new(
            ErrorKind::CircuitOpen,
            ErrorCategory::CircuitOpen,
            service,
            message,
            format!(
                "The {} service is temporarily unavailable. Please try again in a few minutes.",
                service
            ),
        )
    }

    pub fn cancelled(service: &str) -> Self {
        Self::new(
            ErrorKind::Cancelled,
            ErrorCategory::Cancelled,
            service,
            "request cancelled".to_string(),
            "The request was cancelled.".to_string(),
        )
    }

    pub fn unknown_service(service: &str) -> Self {
        Self::new(
            ErrorKind::UnknownService,
            ErrorCategory::ClientError,
            service,
            format!("unknown service '{}'", service),
            "This feature is not available right now.".to_string(),
        )
    }

    pub fn invalid_request(service: &str, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InvalidRequest,
            ErrorCategory::ClientError,
            service,
            reason.into(),
            "The request could not be processed. Please check your input.".to_string(),
        )
    }

    pub(crate) fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub(crate) fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }
}

fn user_message_for(service: &str, kind: ErrorKind, failure: FailureKind, cold_start: bool) -> String {
    if cold_start && failure.is_service_fault() && kind != ErrorKind::Offline {
        return "Service is starting up, please wait...".to_string();
    }
    match (kind, failure) {
        (ErrorKind::Offline, _) => {
            "You appear to be offline. Your request will be sent when the connection is restored.".to_string()
        }
        (ErrorKind::AuthExpired, _) => "Your session has expired. Please sign in again.".to_string(),
        (ErrorKind::RateLimited, _) => "Too many requests. Please wait a moment and try again.".to_string(),
        (_, FailureKind::NoResponse) => {
            format!("Unable to reach the {} service. Please check your connection.", service)
        }
        (_, FailureKind::Status(403)) => "You do not have permission to perform this action.".to_string(),
        (_, FailureKind::Status(404)) => "The requested resource was not found.".to_string(),
        (_, FailureKind::Status(code)) if code >= 500 => {
            format!("The {} service is experiencing problems. Please try again later.", service)
        }
        _ => "The request could not be processed. Please check your input.".to_string(),
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(ErrorCategory::of(FailureKind::Status(401)), ErrorCategory::Authentication);
        assert_eq!(ErrorCategory::of(FailureKind::Status(403)).severity(), Severity::High);
        assert_eq!(ErrorCategory::of(FailureKind::Status(404)).severity(), Severity::Low);
        assert_eq!(ErrorCategory::of(FailureKind::Status(503)).severity(), Severity::Critical);
        assert_eq!(ErrorCategory::of(FailureKind::NoResponse).severity(), Severity::Medium);
        assert_eq!(ErrorCategory::of(FailureKind::Status(422)), ErrorCategory::ClientError);
    }

    #[test]
    fn test_from_failure_kinds() {
        let err = EnrichedError::from_failure("job", &Failure::status(400, "bad"), false, false);
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.retryable);
        assert_eq!(err.status, Some(400));

        let err = EnrichedError::from_failure("job", &Failure::no_response("refused"), true, false);
        assert_eq!(err.kind, ErrorKind::Offline);
        assert!(err.queued && err.retryable);

        let err = EnrichedError::from_failure("job", &Failure::status(502, "bad gateway"), false, true);
        assert_eq!(err.kind, ErrorKind::TransientServer);
        assert_eq!(err.user_message, "Service is starting up, please wait...");
    }

    #[test]
    fn test_circuit_open_display() {
        let err = EnrichedError::circuit_open("payment", Some(Duration::from_millis(1500)));
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
        assert!(err.to_string().starts_with("payment: circuit breaker open"));
        assert!(err.user_message.contains("payment"));
    }
}
