//! Configuration file watcher for membership hot reload.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::LbConfig;

/// True when the two lists name different address sets.
pub fn endpoints_changed(current: &[String], next: &[String]) -> bool {
    let current: HashSet<&str> = current.iter().map(|e| e.trim()).collect();
    let next: HashSet<&str> = next.iter().map(|e| e.trim()).collect();
    current != next
}

/// Watches the config file and forwards configs whose endpoint list changed.
pub struct ConfigWatcher {
    path: PathBuf,
    endpoints: Vec<String>,
    update_tx: mpsc::UnboundedSender<LbConfig>,
}

impl ConfigWatcher {
    /// `endpoints` is the list the pool currently runs with.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path, endpoints: Vec<String>) -> (Self, mpsc::UnboundedReceiver<LbConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                endpoints,
                update_tx,
            },
            update_rx,
        )
    }

    /// Reload the file, returning the new config if membership moved.
    fn reload(&mut self) -> Option<LbConfig> {
        match load_config(&self.path) {
            Ok(config) if endpoints_changed(&self.endpoints, &config.pool.endpoints) => {
                tracing::info!(
                    path = ?self.path,
                    endpoints = config.pool.endpoints.len(),
                    "Endpoint list changed"
                );
                self.endpoints = config.pool.endpoints.clone();
                Some(config)
            }
            Ok(_) => {
                tracing::debug!(path = ?self.path, "Config reloaded, endpoint list unchanged");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current endpoints");
                None
            }
        }
    }

    /// Start watching the file. Dropping the returned watcher stops it.
    pub fn run(mut self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    if let Some(config) = self.reload() {
                        let _ = self.update_tx.send(config);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
