//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the resilient request layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Destination services keyed by logical name (e.g. "auth", "job").
    pub services: BTreeMap<String, ServiceConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Circuit breaker settings shared by every destination.
    pub breaker: BreakerConfig,

    /// Retry policy table.
    pub retry: RetryConfig,

    /// Active health probe settings.
    pub health_check: HealthCheckConfig,

    /// Offline queue settings.
    pub offline: OfflineConfig,

    /// Credential attachment rules.
    pub auth: AuthConfig,

    /// Identification headers sent with every request.
    pub client: ClientIdentityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut services = BTreeMap::new();
        for (name, port) in [("auth", 5001), ("user", 5002), ("job", 5003), ("payment", 5005)] {
            services.insert(
                name.to_string(),
                ServiceConfig {
                    base_url: format!("http://localhost:{}", port),
                    timeout_ms: None,
                },
            );
        }
        // Messaging holds long-polling and upload endpoints.
        services.insert(
            "messaging".to_string(),
            ServiceConfig {
                base_url: "http://localhost:5004".to_string(),
                timeout_ms: Some(60_000),
            },
        );

        Self {
            services,
            timeouts: TimeoutConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            health_check: HealthCheckConfig::default(),
            offline: OfflineConfig::default(),
            auth: AuthConfig::default(),
            client: ClientIdentityConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Effective request timeout for a service (override or global default).
    pub fn timeout_for(&self, service: &str) -> Duration {
        let ms = self
            .services
            .get(service)
            .and_then(|s| s.timeout_ms)
            .unwrap_or(self.timeouts.request_ms);
        Duration::from_millis(ms)
    }
}

/// A single destination service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Base URL, e.g. "https://job-service.example.com".
    pub base_url: String,

    /// Per-service request timeout override in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Default per-request ceiling in milliseconds.
    pub request_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            request_ms: 30_000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures (5xx or no response) before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial request is admitted.
    pub recovery_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

impl BreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

/// Parameters of one retrying row of the policy table.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct BackoffRule {
    /// Base delay in milliseconds.
    pub delay_ms: u64,

    /// Maximum number of retries on top of the first attempt.
    pub max_retries: u32,

    /// Growth factor applied per retry.
    pub backoff_multiplier: f64,
}

/// Rate-limit row of the policy table.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RateLimitRule {
    /// Delay used when the response carries no usable `retry-after`.
    pub default_delay_ms: u64,

    /// Maximum number of retries.
    pub max_retries: u32,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            default_delay_ms: 5_000,
            max_retries: 2,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Services that have not answered yet (cold start, timeouts).
    pub cold_start: BackoffRule,

    /// 5xx responses.
    pub server_error: BackoffRule,

    /// 429 responses.
    pub rate_limit: RateLimitRule,

    /// Upper bound of any single backoff delay in milliseconds.
    pub max_delay_ms: u64,

    /// Random jitter as a fraction of the delay (0.0 disables it).
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cold_start: BackoffRule {
                delay_ms: 5_000,
                max_retries: 6,
                backoff_multiplier: 1.5,
            },
            server_error: BackoffRule {
                delay_ms: 2_000,
                max_retries: 3,
                backoff_multiplier: 2.0,
            },
            rate_limit: RateLimitRule::default(),
            max_delay_ms: 10_000,
            jitter_ratio: 0.0,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable the periodic health probe.
    pub enabled: bool,

    /// Probe interval in seconds.
    pub interval_secs: u64,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe on every service.
    pub path: String,

    /// How long a successful observation counts as "recently healthy".
    pub fresh_window_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            timeout_secs: 5,
            path: "/health".to_string(),
            fresh_window_ms: 30_000,
        }
    }
}

impl HealthCheckConfig {
    pub fn fresh_window(&self) -> Duration {
        Duration::from_millis(self.fresh_window_ms)
    }
}

/// Offline queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Queue network-class failures for replay.
    pub enabled: bool,

    /// Replays allowed before an entry is dropped.
    pub max_replay_attempts: u32,

    /// Maximum queued entries; the oldest is dropped on overflow.
    pub capacity: usize,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_replay_attempts: 3,
            capacity: 100,
        }
    }
}

/// Credential attachment configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Paths that never receive a bearer token, matched as whole segments.
    pub skip_paths: Vec<String>,

    /// Attempt a token refresh on 401.
    pub refresh_on_unauthorized: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            skip_paths: vec!["/login".to_string(), "/register".to_string()],
            refresh_on_unauthorized: true,
        }
    }
}

/// Identification headers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientIdentityConfig {
    /// Value of `X-Service-Client`.
    pub name: String,

    /// Value of `X-Client-Version`.
    pub version: String,
}

impl Default for ClientIdentityConfig {
    fn default() -> Self {
        Self {
            name: "resilient-request".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_services() {
        let config = ClientConfig::default();
        assert_eq!(config.services.len(), 5);
        assert_eq!(config.timeout_for("job"), Duration::from_secs(30));
        assert_eq!(config.timeout_for("messaging"), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [services.job]
            base_url = "https://jobs.example.com"
            timeout_ms = 1500

            [breaker]
            failure_threshold = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.services.len(), 1);
        assert_eq!(config.timeout_for("job"), Duration::from_millis(1500));
        assert_eq!(config.breaker.failure_threshold, 2);
        assert_eq!(config.breaker.recovery_timeout_ms, 60_000);
        assert_eq!(config.retry.server_error.max_retries, 3);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }
}
