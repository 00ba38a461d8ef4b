//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, multipliers >= 1)
//! - Check every service base URL parses as http(s)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;
use url::Url;

use crate::config::schema::{BackoffRule, ClientConfig};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("service '{service}' has invalid base_url '{url}': {reason}")]
    InvalidBaseUrl {
        service: String,
        url: String,
        reason: String,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must be >= 1.0 (got {value})")]
    Multiplier { field: &'static str, value: String },

    #[error("retry.jitter_ratio must be within [0.0, 1.0] (got {0})")]
    JitterRatio(String),

    #[error("health_check.path must start with '/' (got '{0}')")]
    HealthPath(String),
}

pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (name, service) in &config.services {
        match Url::parse(&service.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError::InvalidBaseUrl {
                service: name.clone(),
                url: service.base_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            }),
            Err(e) => errors.push(ValidationError::InvalidBaseUrl {
                service: name.clone(),
                url: service.base_url.clone(),
                reason: e.to_string(),
            }),
        }
        if service.timeout_ms == Some(0) {
            errors.push(ValidationError::Zero {
                field: "services.*.timeout_ms",
            });
        }
    }

    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "timeouts.request_ms",
        });
    }
    if config.breaker.failure_threshold == 0 {
        errors.push(ValidationError::Zero {
            field: "breaker.failure_threshold",
        });
    }
    if config.breaker.recovery_timeout_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "breaker.recovery_timeout_ms",
        });
    }

    check_rule(&config.retry.cold_start, "retry.cold_start.backoff_multiplier", &mut errors);
    check_rule(&config.retry.server_error, "retry.server_error.backoff_multiplier", &mut errors);

    if config.retry.max_delay_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "retry.max_delay_ms",
        });
    }
    if !(0.0..=1.0).contains(&config.retry.jitter_ratio) {
        errors.push(ValidationError::JitterRatio(config.retry.jitter_ratio.to_string()));
    }

    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "health_check.interval_secs",
        });
    }
    if !config.health_check.path.starts_with('/') {
        errors.push(ValidationError::HealthPath(config.health_check.path.clone()));
    }

    if config.offline.capacity == 0 {
        errors.push(ValidationError::Zero {
            field: "offline.capacity",
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_rule(rule: &BackoffRule, field: &'static str, errors: &mut Vec<ValidationError>) {
    if rule.backoff_multiplier.is_nan() || rule.backoff_multiplier < 1.0 {
        errors.push(ValidationError::Multiplier {
            field,
            value: rule.backoff_multiplier.to_string(),
        });
    }
}
