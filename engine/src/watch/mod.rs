//! Filesystem change notification capability
//!
//! Components that react to directories changing underneath them (the
//! runtime registry watching runtime drops land) do so through the
//! [`ChangeSource`] trait rather than the OS API directly: production code
//! watches the filesystem, tests drive events by hand.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// A change to an immediate child of a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathChange {
    /// A child with this file name appeared
    Created(String),
    /// A child with this file name was removed
    Removed(String),
}

/// Capability to observe a directory's immediate children changing.
///
/// Implementations deliver events for as long as the returned receiver is
/// held; dropping it ends the subscription.
pub trait ChangeSource: Send + Sync {
    /// Start watching `path` for child create/remove events.
    fn subscribe(&self, path: &Path) -> sdk::Result<mpsc::UnboundedReceiver<PathChange>>;
}

/// Production change source backed by the OS notification API.
///
/// Watchers are retained for the lifetime of the source; there is no
/// unsubscribe beyond dropping the receiver.
#[derive(Default)]
pub struct NotifyChangeSource {
    watchers: Mutex<Vec<RecommendedWatcher>>,
}

impl NotifyChangeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChangeSource for NotifyChangeSource {
    fn subscribe(&self, path: &Path) -> sdk::Result<mpsc::UnboundedReceiver<PathChange>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let root: PathBuf = path.to_path_buf();

        let mut watcher = notify::recommended_watcher(
            move |result: Result<notify::Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!("Filesystem watcher error: {}", err);
                        return;
                    }
                };
                for changed in &event.paths {
                    // Only immediate children of the watched directory count.
                    if changed.parent() != Some(root.as_path()) {
                        continue;
                    }
                    let Some(name) = changed.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    let change = match event.kind {
                        notify::EventKind::Create(_) => PathChange::Created(name.to_string()),
                        notify::EventKind::Remove(_) => PathChange::Removed(name.to_string()),
                        _ => continue,
                    };
                    // Receiver gone means the subscriber shut down; nothing to do.
                    let _ = tx.send(change);
                }
            },
        )
        .map_err(|e| std::io::Error::other(e.to_string()))?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        self.watchers
            .lock()
            .expect("watcher registry poisoned")
            .push(watcher);
        Ok(rx)
    }
}

/// Manually driven change source for tests.
#[derive(Default)]
pub struct ManualChangeSource {
    senders: Mutex<Vec<mpsc::UnboundedSender<PathChange>>>,
}

impl ManualChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a change to every subscriber.
    pub fn emit(&self, change: PathChange) {
        let senders = self.senders.lock().expect("sender registry poisoned");
        for tx in senders.iter() {
            let _ = tx.send(change.clone());
        }
    }
}

impl ChangeSource for ManualChangeSource {
    fn subscribe(&self, _path: &Path) -> sdk::Result<mpsc::UnboundedReceiver<PathChange>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .expect("sender registry poisoned")
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_source_delivers_to_all_subscribers() {
        let source = ManualChangeSource::new();
        let mut rx1 = source.subscribe(Path::new("/ignored")).unwrap();
        let mut rx2 = source.subscribe(Path::new("/ignored")).unwrap();

        source.emit(PathChange::Created("7".to_string()));

        assert_eq!(rx1.recv().await, Some(PathChange::Created("7".to_string())));
        assert_eq!(rx2.recv().await, Some(PathChange::Created("7".to_string())));
    }

    #[tokio::test]
    async fn test_notify_source_reports_created_children() {
        let dir = tempfile::tempdir().unwrap();
        let source = NotifyChangeSource::new();
        let mut rx = source.subscribe(dir.path()).unwrap();

        std::fs::create_dir(dir.path().join("3")).unwrap();

        let change = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        assert_eq!(change, PathChange::Created("3".to_string()));
    }
}
