//! Resilient request executor.
//!
//! # Request Flow
//! ```text
//! execute(service, request)
//!     → breaker admission (fail fast while open)
//!     → attach identification headers and bearer token
//!     → dispatch (timeout, cancellable)
//!     → success: health + breaker success, return
//!     → failure: health failure, breaker failure (5xx / no response)
//!         → 401: one shared token refresh, re-dispatch
//!         → retry policy: sleep, back to admission
//!         → no response: offline queue
//!         → EnrichedError
//! ```
//!
//! # Design Decisions
//! - Retries are a bounded loop; the request ID is stable across them
//! - Breakers and the health tracker are shared by every caller of one client
//! - Replays from the offline queue never enqueue themselves again

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use thiserror::Error;
use tracing::Instrument;
use url::Url;

use crate::auth::{CredentialSource, NoCredentials, TokenManager};
use crate::client::events::{EventBus, ServiceStatusEvent};
use crate::client::registry::{ServiceRegistry, ServiceStatus};
use crate::config::validation::validate_config;
use crate::config::{ClientConfig, ConfigError};
use crate::error::{EnrichedError, ErrorKind, Failure, FailureKind};
use crate::health::active::probe;
use crate::health::state::{HealthClassification, HealthTracker};
use crate::http::request::{
    PreparedRequest, RequestDescriptor, RequestId, X_CLIENT_VERSION, X_REQUEST_ID, X_SERVICE_CLIENT,
    X_TARGET_SERVICE,
};
use crate::http::response::ServiceResponse;
use crate::http::transport::{HttpTransport, Transport, TransportError};
use crate::observability::metrics;
use crate::offline::{ConnectivityMonitor, DrainReport, OfflineQueue, ReplayOutcome};
use crate::resilience::retries::{retry_delay, select_retry};
use crate::resilience::{CancelToken, CircuitState, Transition};

#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] TransportError),
}

/// Config plus the parsed base URLs derived from it.
#[derive(Debug)]
struct ClientState {
    config: ClientConfig,
    bases: HashMap<String, Url>,
}

impl ClientState {
    fn new(config: ClientConfig) -> Self {
        let bases = config
            .services
            .iter()
            .filter_map(|(name, svc)| match Url::parse(&svc.base_url) {
                Ok(url) => Some((name.clone(), url)),
                Err(e) => {
                    tracing::warn!(service = %name, url = %svc.base_url, error = %e, "Ignoring service with invalid base URL");
                    None
                }
            })
            .collect();
        Self { config, bases }
    }
}

/// Who is driving a request through the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    Replay,
}

pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialSource>>,
    connectivity: Option<ConnectivityMonitor>,
}

impl ClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn build(self) -> Result<ResilientClient, ClientBuildError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;

        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(Duration::from_millis(
                self.config.timeouts.connect_ms,
            ))?),
        };
        let credentials = self.credentials.unwrap_or_else(|| Arc::new(NoCredentials));

        tracing::info!(
            services = self.config.services.len(),
            failure_threshold = self.config.breaker.failure_threshold,
            recovery_timeout_ms = self.config.breaker.recovery_timeout_ms,
            retries_enabled = self.config.retry.enabled,
            "Resilient client configured"
        );

        Ok(ResilientClient {
            registry: ServiceRegistry::new(self.config.breaker.clone()),
            offline: OfflineQueue::new(self.config.offline.max_replay_attempts, self.config.offline.capacity),
            state: ArcSwap::from_pointee(ClientState::new(self.config)),
            transport,
            tokens: TokenManager::new(credentials),
            connectivity: self.connectivity.unwrap_or_default(),
            events: EventBus::new(),
        })
    }
}

/// Entry point for every outbound call to a backend service.
pub struct ResilientClient {
    state: ArcSwap<ClientState>,
    registry: ServiceRegistry,
    transport: Arc<dyn Transport>,
    tokens: TokenManager,
    offline: OfflineQueue,
    connectivity: ConnectivityMonitor,
    events: EventBus,
}

impl ResilientClient {
    /// Client with the reqwest transport and no credentials.
    pub fn new(config: ClientConfig) -> Result<Self, ClientBuildError> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            credentials: None,
            connectivity: None,
        }
    }

    /// Current configuration.
    pub fn config(&self) -> ClientConfig {
        self.state.load().config.clone()
    }

    /// Swap in a reloaded configuration.
    ///
    /// Service URLs, timeouts and policy constants apply to the next request.
    /// Existing breakers keep their thresholds; the offline queue keeps its capacity.
    pub fn apply_config(&self, config: ClientConfig) -> Result<(), ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        self.registry.set_breaker_config(config.breaker.clone());
        tracing::info!(services = config.services.len(), "Configuration applied");
        self.state.store(Arc::new(ClientState::new(config)));
        Ok(())
    }

    pub fn service_names(&self) -> Vec<String> {
        self.state.load().bases.keys().cloned().collect()
    }

    pub fn health(&self) -> &HealthTracker {
        self.registry.health()
    }

    pub fn offline_queue(&self) -> &OfflineQueue {
        &self.offline
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ServiceStatusEvent> {
        self.events.subscribe()
    }

    /// Send `request` to `service` with breaker, retry, auth refresh and offline handling.
    pub async fn execute(&self, service: &str, request: RequestDescriptor) -> Result<ServiceResponse, EnrichedError> {
        self.run(service, request, &CancelToken::new(), Origin::Caller).await
    }

    /// Like [`execute`](Self::execute), aborting the dispatch or backoff sleep once `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        service: &str,
        request: RequestDescriptor,
        cancel: &CancelToken,
    ) -> Result<ServiceResponse, EnrichedError> {
        self.run(service, request, cancel, Origin::Caller).await
    }

    /// Run independent calls concurrently; every call settles on its own.
    pub async fn execute_batch(
        &self,
        calls: Vec<(String, RequestDescriptor)>,
    ) -> Vec<Result<ServiceResponse, EnrichedError>> {
        join_all(
            calls
                .into_iter()
                .map(|(service, request)| async move { self.execute(&service, request).await }),
        )
        .await
    }

    async fn run(
        &self,
        service: &str,
        request: RequestDescriptor,
        cancel: &CancelToken,
        origin: Origin,
    ) -> Result<ServiceResponse, EnrichedError> {
        let request_id = RequestId::new();
        let span = tracing::info_span!(
            "request",
            service = %service,
            request_id = %request_id,
            method = %request.method,
            path = %request.path,
        );
        self.run_attempts(service, request, cancel, origin, &request_id)
            .instrument(span)
            .await
    }

    async fn run_attempts(
        &self,
        service: &str,
        request: RequestDescriptor,
        cancel: &CancelToken,
        origin: Origin,
        request_id: &RequestId,
    ) -> Result<ServiceResponse, EnrichedError> {
        let started = std::time::Instant::now();
        let state = self.state.load_full();
        let config = &state.config;

        let Some(base) = state.bases.get(service) else {
            tracing::warn!("Unknown service");
            metrics::record_request(service, "invalid", started);
            return Err(EnrichedError::unknown_service(service).with_request_id(request_id.as_str()));
        };

        let timeout = request.timeout.unwrap_or_else(|| config.timeout_for(service));
        // Tokens never leave the service's own origin.
        let skip_auth = request.path_matches_any(&config.auth.skip_paths) || !request.targets_origin_of(base);
        let fresh_window = config.health_check.fresh_window();
        let breaker = self.registry.breaker(service);

        let mut attempts: u32 = 0;
        let mut retries: u32 = 0;
        let mut auth_retried = false;
        let mut refreshed_token: Option<String> = None;

        let fail = |err: EnrichedError, attempts: u32| err.with_attempts(attempts).with_request_id(request_id.as_str());

        loop {
            let permit = match breaker.try_acquire() {
                Ok((permit, transition)) => {
                    if let Some(t) = transition {
                        self.on_transition(service, t);
                    }
                    permit
                }
                Err(rejected) => {
                    tracing::warn!(attempts, "Circuit open, failing fast");
                    metrics::record_request(service, "circuit_open", started);
                    return Err(fail(EnrichedError::circuit_open(service, rejected.retry_in), attempts));
                }
            };

            let token = if skip_auth {
                None
            } else {
                refreshed_token.clone().or_else(|| self.tokens.token())
            };
            let prepared = match prepare(config, &request, base, service, timeout, request_id, token) {
                Ok(p) => p,
                Err(reason) => {
                    metrics::record_request(service, "invalid", started);
                    return Err(fail(EnrichedError::invalid_request(service, reason), attempts));
                }
            };

            attempts += 1;
            tracing::debug!(attempt = attempts, url = %prepared.url, trial = permit.is_trial(), "Dispatching request");

            let dispatch_start = tokio::time::Instant::now();
            let outcome = match cancel.run(self.transport.send(prepared)).await {
                Some(outcome) => outcome,
                None => {
                    tracing::info!(attempt = attempts, "Request cancelled during dispatch");
                    metrics::record_request(service, "cancelled", started);
                    return Err(fail(EnrichedError::cancelled(service), attempts));
                }
            };
            let latency = dispatch_start.elapsed();

            let failure = match outcome {
                Ok(response) if response.is_success() => {
                    self.registry.health().record_success(service, Some(latency));
                    if let Some(t) = permit.record_success() {
                        self.on_transition(service, t);
                    }
                    tracing::debug!(status = response.status.as_u16(), attempt = attempts, "Request succeeded");
                    metrics::record_request(service, "success", started);
                    return Ok(response);
                }
                Ok(response) => Failure::status(response.status.as_u16(), response.describe())
                    .with_retry_after(response.retry_after()),
                Err(TransportError::InvalidRequest(reason)) => {
                    metrics::record_request(service, "invalid", started);
                    return Err(fail(EnrichedError::invalid_request(service, reason), attempts));
                }
                Err(TransportError::Body { status, message }) => body_failure(status, message),
                Err(e) => Failure::no_response(e.to_string()),
            };

            let may_enqueue = origin == Origin::Caller && config.offline.enabled;

            // Lost local connectivity says nothing about the service.
            if failure.kind.is_no_response() && !self.connectivity.is_online() {
                drop(permit);
                tracing::debug!(attempt = attempts, failure = %failure.message, "Attempt failed while offline");
                if may_enqueue {
                    return Err(fail(self.enqueue(service, &request, &failure, request_id, started), attempts));
                }
                metrics::record_request(service, "failure", started);
                return Err(fail(EnrichedError::from_failure(service, &failure, false, false), attempts));
            }

            self.registry.health().record_failure(service, &failure, Some(latency));
            if failure.kind.is_service_fault() {
                if let Some(t) = permit.record_failure() {
                    self.on_transition(service, t);
                }
            } else {
                // Client errors say nothing about the service; a trial slot is just released.
                drop(permit);
            }

            tracing::debug!(attempt = attempts, failure = %failure.message, "Attempt failed");

            if failure.kind == FailureKind::Status(401)
                && !auth_retried
                && !skip_auth
                && config.auth.refresh_on_unauthorized
            {
                auth_retried = true;
                match cancel.run(self.tokens.refresh()).await {
                    None => {
                        metrics::record_request(service, "cancelled", started);
                        return Err(fail(EnrichedError::cancelled(service), attempts));
                    }
                    Some(Ok(token)) => {
                        tracing::info!(attempt = attempts, "Token refreshed, retrying request");
                        refreshed_token = Some(token);
                        continue;
                    }
                    Some(Err(_)) => {}
                }
            }

            let health = self.registry.health().classify(service, fresh_window);
            let decision = select_retry(&failure, health, &config.retry);

            if decision.should_retry && retries < decision.max_retries {
                let delay = retry_delay(&decision, retries, &config.retry);
                retries += 1;
                tracing::info!(
                    attempt = attempts,
                    retry = retries,
                    max_retries = decision.max_retries,
                    reason = decision.reason.as_str(),
                    delay = ?delay,
                    "Retrying request"
                );
                metrics::record_retry(service, decision.reason.as_str());

                if cancel.run(tokio::time::sleep(delay)).await.is_none() {
                    tracing::info!(attempt = attempts, "Request cancelled during backoff");
                    metrics::record_request(service, "cancelled", started);
                    return Err(fail(EnrichedError::cancelled(service), attempts));
                }
                continue;
            }

            if failure.kind.is_no_response() && may_enqueue {
                return Err(fail(self.enqueue(service, &request, &failure, request_id, started), attempts));
            }

            let err = EnrichedError::from_failure(
                service,
                &failure,
                false,
                health == HealthClassification::ColdStart,
            );
            if failure.kind.is_service_fault() {
                tracing::error!(attempts, error = %err, "Request failed");
            } else {
                tracing::warn!(attempts, error = %err, "Request failed");
            }
            metrics::record_request(service, "failure", started);
            return Err(fail(err, attempts));
        }
    }

    fn enqueue(
        &self,
        service: &str,
        request: &RequestDescriptor,
        failure: &Failure,
        request_id: &RequestId,
        started: std::time::Instant,
    ) -> EnrichedError {
        tracing::warn!(error = %failure.message, "Service unreachable, queueing request for replay");
        self.offline.enqueue(request.clone(), service);
        self.events.publish(ServiceStatusEvent::RequestQueued {
            service: service.to_string(),
            request_id: request_id.to_string(),
        });
        metrics::record_request(service, "queued", started);
        EnrichedError::from_failure(service, failure, true, false)
    }

    fn on_transition(&self, service: &str, transition: Transition) {
        match transition.to {
            CircuitState::Open => tracing::warn!(
                service = %service,
                from = transition.from.as_str(),
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!(service = %service, "Circuit breaker half-open, admitting trial"),
            CircuitState::Closed => tracing::info!(
                service = %service,
                from = transition.from.as_str(),
                "Circuit breaker closed"
            ),
        }
        metrics::record_breaker_transition(service, transition.to);
        self.events.publish(ServiceStatusEvent::BreakerTransition {
            service: service.to_string(),
            from: transition.from,
            to: transition.to,
        });
    }

    /// Replay everything in the offline queue through the executor.
    pub async fn drain_offline_queue(&self) -> DrainReport {
        self.drain_offline_queue_with(&CancelToken::new()).await
    }

    /// Like [`drain_offline_queue`](Self::drain_offline_queue), but stops early
    /// once `cancel` fires. Interrupted and unstarted entries go back in the
    /// queue with their replay count untouched.
    pub async fn drain_offline_queue_with(&self, cancel: &CancelToken) -> DrainReport {
        let report = self
            .offline
            .drain_with(|entry| async move {
                if cancel.is_cancelled() {
                    return ReplayOutcome::Deferred;
                }
                match self.run(&entry.service, entry.request, cancel, Origin::Replay).await {
                    Ok(_) => ReplayOutcome::Delivered,
                    Err(e) if e.kind == ErrorKind::Cancelled => ReplayOutcome::Deferred,
                    Err(e) if is_permanent(e.kind) => ReplayOutcome::Discard,
                    Err(_) => ReplayOutcome::Retry,
                }
            })
            .await;
        if report != DrainReport::default() {
            self.events.publish(ServiceStatusEvent::QueueDrained(report));
        }
        report
    }

    /// Probe `service` now, regardless of its recorded health.
    pub async fn check_health(&self, service: &str) -> Result<bool, EnrichedError> {
        let state = self.state.load_full();
        let base = state
            .bases
            .get(service)
            .ok_or_else(|| EnrichedError::unknown_service(service))?;
        let hc = &state.config.health_check;
        let user_agent = format!("{}-health-check", state.config.client.name);

        match probe(
            self.transport.as_ref(),
            base,
            &hc.path,
            Duration::from_secs(hc.timeout_secs),
            &user_agent,
        )
        .await
        {
            Ok(latency) => {
                tracing::debug!(service = %service, latency = ?latency, "Health check passed");
                self.registry.health().record_success(service, Some(latency));
                Ok(true)
            }
            Err(failure) => {
                tracing::warn!(service = %service, error = %failure.message, "Health check failed");
                self.registry.health().record_failure(service, &failure, None);
                Ok(false)
            }
        }
    }

    /// Probe `service` only if it has not been seen healthy recently.
    pub async fn ensure_service_health(&self, service: &str) -> Result<bool, EnrichedError> {
        let window = self.state.load().config.health_check.fresh_window();
        if self.registry.health().is_recently_healthy(service, window) {
            return Ok(true);
        }
        self.check_health(service).await
    }

    pub fn status(&self, service: &str) -> Option<ServiceStatus> {
        let state = self.state.load();
        let base = state.bases.get(service)?;
        Some(
            self.registry
                .status(service, base.as_str(), state.config.health_check.fresh_window()),
        )
    }

    pub fn status_all(&self) -> Vec<ServiceStatus> {
        let state = self.state.load();
        let window = state.config.health_check.fresh_window();
        state
            .bases
            .iter()
            .map(|(name, base)| self.registry.status(name, base.as_str(), window))
            .collect()
    }

    /// Force one breaker closed with a zero failure count.
    ///
    /// Returns whether the service had a breaker to reset; services never
    /// called have none.
    pub fn reset_breaker(&self, service: &str) -> bool {
        let Some(breaker) = self.registry.get(service) else {
            return false;
        };
        if let Some(t) = breaker.reset() {
            self.on_transition(service, t);
        }
        true
    }

    pub fn reset_all_breakers(&self) {
        for (service, t) in self.registry.reset_all() {
            self.on_transition(&service, t);
        }
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("services", &self.service_names())
            .field("offline_queue", &self.offline.len())
            .field("online", &self.connectivity.is_online())
            .finish()
    }
}

/// The service answered but its body was cut off. Error statuses keep their
/// code; a truncated success counts as a bad gateway answer.
fn body_failure(status: u16, message: String) -> Failure {
    let code = if status >= 400 { status } else { 502 };
    Failure::status(code, format!("response body from {} could not be read: {}", status, message))
}

/// Replay failures that another replay cannot fix.
fn is_permanent(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Validation | ErrorKind::AuthExpired | ErrorKind::UnknownService | ErrorKind::InvalidRequest
    )
}

fn prepare(
    config: &ClientConfig,
    request: &RequestDescriptor,
    base: &Url,
    service: &str,
    timeout: Duration,
    request_id: &RequestId,
    token: Option<String>,
) -> Result<PreparedRequest, String> {
    let url = request
        .resolve_url(base)
        .map_err(|e| format!("cannot resolve '{}' against {}: {}", request.path, base, e))?;

    let mut prepared = PreparedRequest {
        method: request.method.clone(),
        url,
        headers: request.headers.clone(),
        body: request.body.clone(),
        timeout,
    };
    prepared.set_header(X_REQUEST_ID, request_id.to_string());
    prepared.set_header(X_TARGET_SERVICE, service.to_string());
    prepared.set_header(X_SERVICE_CLIENT, config.client.name.clone());
    prepared.set_header(X_CLIENT_VERSION, config.client.version.clone());
    if let Some(token) = token {
        prepared.set_header("authorization", format!("Bearer {}", token));
    }
    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_sets_identification_headers() {
        let config = ClientConfig::default();
        let base = Url::parse("http://localhost:5003").unwrap();
        let id = RequestId::new();
        let req = RequestDescriptor::get("/jobs").header("accept", "application/json");

        let prepared = prepare(&config, &req, &base, "job", Duration::from_secs(30), &id, Some("t0k".into())).unwrap();

        assert_eq!(prepared.url.as_str(), "http://localhost:5003/jobs");
        assert_eq!(prepared.header(X_REQUEST_ID), Some(id.as_str()));
        assert_eq!(prepared.header(X_TARGET_SERVICE), Some("job"));
        assert_eq!(prepared.header(X_SERVICE_CLIENT), Some("resilient-request"));
        assert_eq!(prepared.header("Authorization"), Some("Bearer t0k"));
        assert_eq!(prepared.header("accept"), Some("application/json"));
    }

    #[test]
    fn test_prepare_without_token() {
        let config = ClientConfig::default();
        let base = Url::parse("http://localhost:5001").unwrap();
        let prepared = prepare(
            &config,
            &RequestDescriptor::get("/login"),
            &base,
            "auth",
            Duration::from_secs(5),
            &RequestId::new(),
            None,
        )
        .unwrap();
        assert_eq!(prepared.header("authorization"), None);
    }

    #[test]
    fn test_truncated_body_is_an_answer() {
        let failure = body_failure(200, "connection closed".into());
        assert_eq!(failure.kind, FailureKind::Status(502));
        assert!(!failure.kind.is_no_response());

        assert_eq!(body_failure(404, "reset".into()).kind, FailureKind::Status(404));
    }

    #[test]
    fn test_permanent_replay_failures() {
        assert!(is_permanent(ErrorKind::Validation));
        assert!(!is_permanent(ErrorKind::TransientServer));
        assert!(!is_permanent(ErrorKind::CircuitOpen));
        assert!(!is_permanent(ErrorKind::Offline));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = ClientConfig::default();
        config.breaker.failure_threshold = 0;
        let err = ResilientClient::new(config).unwrap_err();
        assert!(matches!(err, ClientBuildError::Config(ConfigError::Validation(_))));
    }
}
