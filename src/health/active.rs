//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every configured service's health endpoint
//! - Record results in the health tracker (breakers are left alone)

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};
use url::Url;

use crate::client::ResilientClient;
use crate::error::Failure;
use crate::http::request::{PreparedRequest, RequestDescriptor};
use crate::http::transport::Transport;
use crate::observability::metrics;

/// Probe `<base><path>` once. Returns the latency of a successful probe.
pub async fn probe(
    transport: &dyn Transport,
    base: &Url,
    path: &str,
    timeout: Duration,
    user_agent: &str,
) -> Result<Duration, Failure> {
    let url = RequestDescriptor::get(path)
        .resolve_url(base)
        .map_err(|e| Failure::no_response(format!("invalid health check url: {}", e)))?;

    let request = PreparedRequest {
        method: Method::GET,
        url,
        headers: vec![("user-agent".to_string(), user_agent.to_string())],
        body: None,
        timeout,
    };

    let start = Instant::now();
    match time::timeout(timeout, transport.send(request)).await {
        Ok(Ok(response)) if response.is_success() => Ok(start.elapsed()),
        Ok(Ok(response)) => Err(Failure::status(response.status.as_u16(), response.describe())),
        Ok(Err(e)) => Err(Failure::no_response(e.to_string())),
        Err(_) => Err(Failure::no_response(format!("health check timed out after {:?}", timeout))),
    }
}

pub struct HealthMonitor {
    client: Arc<ResilientClient>,
}

impl HealthMonitor {
    pub fn new(client: Arc<ResilientClient>) -> Self {
        Self { client }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let config = self.client.config().health_check.clone();
        if !config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = config.interval_secs,
            path = %config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(config.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every configured service once.
    pub async fn check_all(&self) {
        for service in self.client.service_names() {
            let healthy = match self.client.check_health(&service).await {
                Ok(healthy) => healthy,
                Err(e) => {
                    tracing::warn!(service = %service, error = %e, "Health check skipped");
                    continue;
                }
            };
            metrics::record_service_health(&service, healthy);
        }
    }
}
