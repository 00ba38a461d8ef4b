//! Per-service health records.
//!
//! # States
//! - Healthy: last observation succeeded
//! - Unhealthy: last observation failed, with the failure kind remembered
//!
//! # Classification
//! ```text
//! no record / stale healthy record   → Unknown
//! healthy, observed within window    → Healthy
//! unhealthy, last failure no response → ColdStart
//! unhealthy, last failure HTTP error  → Degraded
//! ```

use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::{now_millis, Failure, FailureKind};

/// Health classification consumed by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthClassification {
    Unknown,
    Healthy,
    /// Not answering at all; typically a service still starting up.
    ColdStart,
    /// Answering, but with server errors.
    Degraded,
}

/// Last-known state of one destination.
#[derive(Debug, Clone)]
pub struct ServiceHealthRecord {
    pub is_healthy: bool,
    pub last_checked_at: Instant,
    pub last_checked_wall: SystemTime,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_failure_kind: Option<FailureKind>,
    pub last_latency: Option<Duration>,
}

/// Serializable view of a health record.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub service: String,
    pub is_healthy: bool,
    pub classification: HealthClassification,
    /// Milliseconds since the record was last updated.
    pub age_ms: u64,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_latency_ms: Option<u64>,
}

/// Records reachability per service.
///
/// Mutated only by the executor and the active health monitor.
#[derive(Debug, Default)]
pub struct HealthTracker {
    records: DashMap<String, ServiceHealthRecord>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a successful request/check.
    pub fn record_success(&self, service: &str, latency: Option<Duration>) {
        let now = Instant::now();
        let mut entry = self
            .records
            .entry(service.to_string())
            .or_insert_with(|| blank_record(now));
        let record = entry.value_mut();

        if !record.is_healthy {
            tracing::info!(service = %service, "Service observed healthy");
        }
        record.is_healthy = true;
        record.last_checked_at = now;
        record.last_checked_wall = SystemTime::now();
        record.consecutive_failures = 0;
        record.last_latency = latency;
    }

    /// Report a failed request/check.
    pub fn record_failure(&self, service: &str, failure: &Failure, latency: Option<Duration>) {
        let now = Instant::now();
        let mut entry = self
            .records
            .entry(service.to_string())
            .or_insert_with(|| blank_record(now));
        let record = entry.value_mut();

        record.is_healthy = false;
        record.last_checked_at = now;
        record.last_checked_wall = SystemTime::now();
        record.last_error = Some(failure.message.clone());
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_failure_kind = Some(failure.kind);
        record.last_latency = latency;
    }

    /// True iff the service was observed healthy less than `max_age` ago.
    pub fn is_recently_healthy(&self, service: &str, max_age: Duration) -> bool {
        self.records
            .get(service)
            .map(|r| r.is_healthy && r.last_checked_at.elapsed() < max_age)
            .unwrap_or(false)
    }

    pub fn classify(&self, service: &str, max_age: Duration) -> HealthClassification {
        match self.records.get(service) {
            None => HealthClassification::Unknown,
            Some(r) => classify_record(&r, max_age),
        }
    }

    pub fn record(&self, service: &str) -> Option<ServiceHealthRecord> {
        self.records.get(service).map(|r| r.value().clone())
    }

    pub fn snapshot(&self, service: &str, max_age: Duration) -> Option<HealthSnapshot> {
        self.records
            .get(service)
            .map(|r| to_snapshot(service, &r, max_age))
    }

    pub fn snapshot_all(&self, max_age: Duration) -> Vec<HealthSnapshot> {
        let mut all: Vec<_> = self
            .records
            .iter()
            .map(|r| to_snapshot(r.key(), r.value(), max_age))
            .collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }
}

fn blank_record(now: Instant) -> ServiceHealthRecord {
    ServiceHealthRecord {
        is_healthy: false,
        last_checked_at: now,
        last_checked_wall: SystemTime::now(),
        last_error: None,
        consecutive_failures: 0,
        last_failure_kind: None,
        last_latency: None,
    }
}

fn classify_record(record: &ServiceHealthRecord, max_age: Duration) -> HealthClassification {
    if record.is_healthy {
        if record.last_checked_at.elapsed() < max_age {
            HealthClassification::Healthy
        } else {
            HealthClassification::Unknown
        }
    } else {
        match record.last_failure_kind {
            Some(FailureKind::NoResponse) => HealthClassification::ColdStart,
            Some(FailureKind::Status(_)) => HealthClassification::Degraded,
            None => HealthClassification::Unknown,
        }
    }
}

fn to_snapshot(service: &str, record: &ServiceHealthRecord, max_age: Duration) -> HealthSnapshot {
    let checked_ms = record
        .last_checked_wall
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    HealthSnapshot {
        service: service.to_string(),
        is_healthy: record.is_healthy,
        classification: classify_record(record, max_age),
        age_ms: now_millis().saturating_sub(checked_ms),
        last_error: record.last_error.clone(),
        consecutive_failures: record.consecutive_failures,
        last_latency_ms: record.last_latency.map(|d| d.as_millis() as u64),
    }
}
