//! Network connectivity signal and the replay task it drives.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::client::ResilientClient;
use crate::resilience::CancelToken;

/// Online/offline flag shared by the executor and the replay task.
///
/// Starts online. Whoever knows about the network (an OS hook, a UI layer,
/// a test) flips it with [`set_online`](Self::set_online).
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn set_online(&self, online: bool) {
        let previous = self.tx.send_replace(online);
        if previous != online {
            if online {
                tracing::info!("Connectivity restored");
            } else {
                tracing::warn!("Connectivity lost");
            }
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain the client's offline queue on every offline → online edge.
///
/// Runs until `shutdown` fires. A drain in progress at shutdown is cancelled;
/// its unfinished entries stay queued.
pub async fn run_replay_loop(client: Arc<ResilientClient>, mut shutdown: broadcast::Receiver<()>) {
    let mut rx = client.connectivity().subscribe();
    let mut was_online = *rx.borrow_and_update();

    tracing::info!(online = was_online, "Offline replay task started");

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *rx.borrow_and_update();
                let reconnected = online && !was_online;
                was_online = online;
                if !reconnected {
                    continue;
                }

                let cancel = CancelToken::new();
                let drain = client.drain_offline_queue_with(&cancel);
                tokio::pin!(drain);
                let report = tokio::select! {
                    report = &mut drain => report,
                    _ = shutdown.recv() => {
                        cancel.cancel();
                        let report = drain.await;
                        tracing::info!(
                            requeued = report.requeued,
                            "Replay interrupted by shutdown"
                        );
                        break;
                    }
                };
                tracing::debug!(
                    delivered = report.delivered,
                    requeued = report.requeued,
                    dropped = report.dropped,
                    "Replay after reconnect finished"
                );
            }
            _ = shutdown.recv() => {
                tracing::info!("Offline replay task shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_online() {
        let monitor = ConnectivityMonitor::new();
        assert!(monitor.is_online());
        monitor.set_online(false);
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_edges() {
        let monitor = ConnectivityMonitor::new();
        let mut rx = monitor.subscribe();
        monitor.set_online(false);
        rx.changed().await.unwrap();
        assert!(!*rx.borrow_and_update());

        let clone = monitor.clone();
        clone.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }
}
