//! Configuration file watcher for hot reload.
//!
//! File events only wake the reload task; the task reads, validates and
//! applies the file to the client. A burst of events becomes one reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::client::ResilientClient;
use crate::config::loader::{load_config, ConfigError};

/// Reloads a client's configuration whenever its file changes.
pub struct ConfigWatcher {
    path: PathBuf,
    client: Arc<ResilientClient>,
}

impl ConfigWatcher {
    pub fn new(path: &Path, client: Arc<ResilientClient>) -> Self {
        Self {
            path: path.to_path_buf(),
            client,
        }
    }

    /// Read the file and apply it. On error the client keeps its current configuration.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let config = load_config(&self.path)?;
        let services = config.services.len();
        self.client.apply_config(config)?;
        tracing::info!(path = ?self.path, services, "Configuration reloaded");
        Ok(())
    }

    /// Start watching and spawn the reload task.
    ///
    /// The task owns the file watcher and stops when `shutdown` fires.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> Result<JoinHandle<()>, notify::Error> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_change(&event) => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?self.path, "Config watcher started");

        Ok(tokio::spawn(async move {
            let _watcher = watcher;
            loop {
                tokio::select! {
                    changed = rx.recv() => {
                        if changed.is_none() {
                            break;
                        }
                        while rx.try_recv().is_ok() {}
                        tracing::info!(path = ?self.path, "Config file change detected, reloading");
                        if let Err(e) = self.reload() {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
            tracing::debug!(path = ?self.path, "Config watcher stopped");
        }))
    }
}

fn is_change(event: &Event) -> bool {
    event.kind.is_modify() || event.kind.is_create()
}
