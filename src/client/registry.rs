//! Per-service breaker and health registry.
//!
//! # Responsibilities
//! - Own one circuit breaker per service, created on first use
//! - Own the shared health tracker
//! - Produce status snapshots for operators

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;

use crate::config::BreakerConfig;
use crate::health::state::{HealthSnapshot, HealthTracker};
use crate::resilience::{BreakerSnapshot, CircuitBreaker, Transition};

/// Operator view of one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service: String,
    pub base_url: String,
    pub circuit: BreakerSnapshot,
    pub health: Option<HealthSnapshot>,
}

#[derive(Debug)]
pub struct ServiceRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    health: HealthTracker,
    breaker_config: ArcSwap<BreakerConfig>,
}

impl ServiceRegistry {
    pub fn new(breaker_config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            health: HealthTracker::new(),
            breaker_config: ArcSwap::from_pointee(breaker_config),
        }
    }

    /// Breaker for `service`, created with the current settings if missing.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return Arc::clone(existing.value());
        }
        let config = self.breaker_config.load();
        let entry = self
            .breakers
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service, &config)));
        Arc::clone(entry.value())
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Settings for breakers created from now on; existing breakers keep theirs.
    pub fn set_breaker_config(&self, config: BreakerConfig) {
        self.breaker_config.store(Arc::new(config));
    }

    pub fn status(&self, service: &str, base_url: &str, fresh_window: Duration) -> ServiceStatus {
        ServiceStatus {
            service: service.to_string(),
            base_url: base_url.to_string(),
            circuit: self.breaker(service).snapshot(),
            health: self.health.snapshot(service, fresh_window),
        }
    }

    /// Existing breaker for `service`; never creates one.
    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).map(|b| Arc::clone(b.value()))
    }

    /// Reset every breaker, returning the ones that changed state.
    pub fn reset_all(&self) -> Vec<(String, Transition)> {
        let breakers: Vec<_> = self
            .breakers
            .iter()
            .map(|b| (b.key().clone(), Arc::clone(b.value())))
            .collect();
        breakers
            .into_iter()
            .filter_map(|(name, breaker)| breaker.reset().map(|t| (name, t)))
            .collect()
    }
}
