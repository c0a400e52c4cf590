//! Download counter store
//!
//! A JSON-backed map of per-plugin download counts. Increments only set a
//! dirty flag; a periodic flush writes the map back when something changed,
//! so the hot download path never waits on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tracing::{debug, error};

/// Dirty-flag-flushed counter store.
pub struct DownloadCounter {
    file: PathBuf,
    counts: RwLock<HashMap<String, u64>>,
    dirty: AtomicBool,
}

impl DownloadCounter {
    /// Load the counter map from `file`; a missing or unreadable file
    /// starts the map empty.
    pub async fn load(file: PathBuf) -> Self {
        let counts = match tokio::fs::read_to_string(&file).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
                error!("Failed to parse download counts: {}", err);
                HashMap::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                error!("Failed to load download counts: {}", err);
                HashMap::new()
            }
        };
        Self {
            file,
            counts: RwLock::new(counts),
            dirty: AtomicBool::new(false),
        }
    }

    /// Current count for a plugin
    pub async fn get(&self, uuid: &str) -> u64 {
        self.counts.read().await.get(uuid).copied().unwrap_or(0)
    }

    /// Bump a plugin's count, returning the new value
    pub async fn increment(&self, uuid: &str) -> u64 {
        let mut counts = self.counts.write().await;
        let count = counts.entry(uuid.to_string()).or_insert(0);
        *count += 1;
        self.dirty.store(true, Ordering::Release);
        *count
    }

    /// Write the map back if anything changed since the last flush.
    pub async fn flush(&self) {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        let json = {
            let counts = self.counts.read().await;
            match serde_json::to_string(&*counts) {
                Ok(json) => json,
                Err(err) => {
                    error!("Failed to serialize download counts: {}", err);
                    return;
                }
            }
        };
        if let Err(err) = tokio::fs::write(&self.file, json).await {
            // Leave the flag set so the next tick retries.
            self.dirty.store(true, Ordering::Release);
            error!("Failed to save download counts: {}", err);
        } else {
            debug!("Download counts saved");
        }
    }

    /// Flush on a fixed cadence until shutdown fires, then flush once more.
    pub async fn flush_loop(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.flush().await;
                        return;
                    }
                }
            }
        }
    }
}
