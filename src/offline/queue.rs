//! Offline request queue.
//!
//! # Responsibilities
//! - Hold requests that failed because nothing answered
//! - Replay them when connectivity returns, FIFO per service
//! - Drop entries that keep failing, with a log line
//!
//! # Design Decisions
//! - `drain` snapshots and clears the queue before replaying, so requests
//!   enqueued during a drain wait for the next one
//! - Services replay concurrently; entries of one service replay in order
//! - Bounded: on overflow the oldest entry is dropped

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::time::Instant;

use crate::http::request::RequestDescriptor;
use crate::observability::metrics;

/// A request waiting for connectivity.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub request: RequestDescriptor,
    pub service: String,
    pub enqueued_at: Instant,
    /// Failed replays so far.
    pub retry_count: u32,
}

/// Result of replaying one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Delivered,
    /// Failed in a way another replay might fix.
    Retry,
    /// Failed permanently (the service rejected it).
    Discard,
    /// Not attempted to completion; back in the queue without using up a replay.
    Deferred,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub requeued: usize,
    pub dropped: usize,
}

#[derive(Debug)]
pub struct OfflineQueue {
    entries: Mutex<VecDeque<QueuedRequest>>,
    max_replay_attempts: u32,
    capacity: usize,
}

impl OfflineQueue {
    pub fn new(max_replay_attempts: u32, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_replay_attempts: max_replay_attempts.max(1),
            capacity: capacity.max(1),
        }
    }

    pub fn enqueue(&self, request: RequestDescriptor, service: &str) {
        self.push(QueuedRequest {
            request,
            service: service.to_string(),
            enqueued_at: Instant::now(),
            retry_count: 0,
        });
    }

    fn push(&self, entry: QueuedRequest) {
        let mut entries = self.entries.lock().expect("offline queue mutex poisoned");
        if entries.len() >= self.capacity {
            if let Some(oldest) = entries.pop_front() {
                tracing::warn!(
                    service = %oldest.service,
                    method = %oldest.request.method,
                    path = %oldest.request.path,
                    "Offline queue full, dropping oldest request"
                );
            }
        }
        tracing::info!(
            service = %entry.service,
            method = %entry.request.method,
            path = %entry.request.path,
            retry_count = entry.retry_count,
            "Request queued for replay"
        );
        entries.push_back(entry);
        metrics::record_queue_depth(entries.len());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("offline queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current entries, oldest first.
    pub fn pending(&self) -> Vec<QueuedRequest> {
        self.entries
            .lock()
            .expect("offline queue mutex poisoned")
            .iter()
            .cloned()
            .collect()
    }

    fn take_all(&self) -> Vec<QueuedRequest> {
        let mut entries = self.entries.lock().expect("offline queue mutex poisoned");
        let taken: Vec<_> = entries.drain(..).collect();
        metrics::record_queue_depth(0);
        taken
    }

    /// Replay every queued entry through `replay`.
    pub async fn drain_with<F, Fut>(&self, replay: F) -> DrainReport
    where
        F: Fn(QueuedRequest) -> Fut,
        Fut: Future<Output = ReplayOutcome>,
    {
        let snapshot = self.take_all();
        if snapshot.is_empty() {
            return DrainReport::default();
        }
        tracing::info!(entries = snapshot.len(), "Draining offline queue");

        // Group by service, keeping first-seen order of services and FIFO inside each.
        let mut groups: Vec<(String, Vec<QueuedRequest>)> = Vec::new();
        for entry in snapshot {
            match groups.iter_mut().find(|(s, _)| *s == entry.service) {
                Some((_, group)) => group.push(entry),
                None => groups.push((entry.service.clone(), vec![entry])),
            }
        }

        let replay = &replay;
        let reports = join_all(groups.into_iter().map(|(_, group)| async move {
            let mut report = DrainReport::default();
            for entry in group {
                match replay(entry.clone()).await {
                    ReplayOutcome::Delivered => report.delivered += 1,
                    ReplayOutcome::Discard => {
                        tracing::warn!(
                            service = %entry.service,
                            path = %entry.request.path,
                            "Replayed request rejected, dropping"
                        );
                        report.dropped += 1;
                    }
                    ReplayOutcome::Retry => {
                        let retry_count = entry.retry_count + 1;
                        if retry_count >= self.max_replay_attempts {
                            tracing::warn!(
                                service = %entry.service,
                                path = %entry.request.path,
                                attempts = retry_count,
                                "Replay failed permanently, dropping request"
                            );
                            report.dropped += 1;
                        } else {
                            self.push(QueuedRequest { retry_count, ..entry });
                            report.requeued += 1;
                        }
                    }
                    ReplayOutcome::Deferred => {
                        self.push(entry);
                        report.requeued += 1;
                    }
                }
            }
            report
        }))
        .await;

        let total = reports.into_iter().fold(DrainReport::default(), |acc, r| DrainReport {
            delivered: acc.delivered + r.delivered,
            requeued: acc.requeued + r.requeued,
            dropped: acc.dropped + r.dropped,
        });
        tracing::info!(
            delivered = total.delivered,
            requeued = total.requeued,
            dropped = total.dropped,
            "Offline queue drained"
        );
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn req(path: &str) -> RequestDescriptor {
        RequestDescriptor::get(path)
    }

    #[tokio::test]
    async fn test_drain_preserves_fifo_per_service() {
        let queue = OfflineQueue::new(3, 100);
        queue.enqueue(req("/a1"), "a");
        queue.enqueue(req("/b1"), "b");
        queue.enqueue(req("/a2"), "a");
        queue.enqueue(req("/a3"), "a");

        let seen = StdMutex::new(Vec::new());
        let report = queue
            .drain_with(|entry| {
                seen.lock().unwrap().push(entry.request.path.clone());
                async { ReplayOutcome::Delivered }
            })
            .await;

        assert_eq!(report.delivered, 4);
        assert!(queue.is_empty());
        let seen = seen.into_inner().unwrap();
        let a_order: Vec<_> = seen.iter().filter(|p| p.starts_with("/a")).cloned().collect();
        assert_eq!(a_order, vec!["/a1", "/a2", "/a3"]);
    }

    #[tokio::test]
    async fn test_failed_replays_dropped_at_ceiling() {
        let queue = OfflineQueue::new(3, 100);
        queue.enqueue(req("/jobs"), "job");

        for round in 1..=2 {
            let report = queue.drain_with(|_| async { ReplayOutcome::Retry }).await;
            assert_eq!(report.requeued, 1, "round {}", round);
            assert_eq!(queue.pending()[0].retry_count, round);
        }

        let report = queue.drain_with(|_| async { ReplayOutcome::Retry }).await;
        assert_eq!(report.dropped, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_discard_drops_immediately() {
        let queue = OfflineQueue::new(3, 100);
        queue.enqueue(req("/bad"), "job");
        let report = queue.drain_with(|_| async { ReplayOutcome::Discard }).await;
        assert_eq!(report, DrainReport { delivered: 0, requeued: 0, dropped: 1 });
    }

    #[tokio::test]
    async fn test_deferred_keeps_replay_count() {
        let queue = OfflineQueue::new(1, 10);
        queue.enqueue(RequestDescriptor::get("/jobs"), "job");

        for _ in 0..3 {
            let report = queue.drain_with(|_| async { ReplayOutcome::Deferred }).await;
            assert_eq!(report.requeued, 1);
        }
        assert_eq!(queue.pending()[0].retry_count, 0);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let queue = OfflineQueue::new(3, 2);
        queue.enqueue(req("/1"), "job");
        queue.enqueue(req("/2"), "job");
        queue.enqueue(req("/3"), "job");

        let pending: Vec<_> = queue.pending().into_iter().map(|e| e.request.path).collect();
        assert_eq!(pending, vec!["/2", "/3"]);
    }

    #[tokio::test]
    async fn test_empty_drain() {
        let queue = OfflineQueue::new(3, 10);
        let report = queue.drain_with(|_| async { ReplayOutcome::Delivered }).await;
        assert_eq!(report, DrainReport::default());
    }
}
