//! Published plugin read model
//!
//! A snapshot view over the artifact bundles on disk, kept current by
//! publish/unpublish notifications and an occasional full reload. The API
//! layer only ever reads from here; the publisher is the single writer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tracing::error;

use sdk::manifest::PluginManifest;

use crate::downloads::DownloadCounter;

/// Name of the packaged artifact inside a bundle directory
const BUNDLE_ZIP: &str = "download.zip";

/// One published plugin as advertised to clients.
#[derive(Debug, Clone)]
pub struct PublishedPlugin {
    pub manifest: PluginManifest,
    pub last_updated: DateTime<Utc>,
    pub download_count: u64,
}

/// Read model over the published artifact bundles.
pub struct PublishedCatalog {
    plugins_root: PathBuf,
    downloads: Arc<DownloadCounter>,
    plugins: RwLock<Vec<PublishedPlugin>>,
}

impl PublishedCatalog {
    pub fn new(plugins_root: impl Into<PathBuf>, downloads: Arc<DownloadCounter>) -> Self {
        Self {
            plugins_root: plugins_root.into(),
            downloads,
            plugins: RwLock::new(Vec::new()),
        }
    }

    /// Look up one published plugin by uuid
    pub async fn get(&self, uuid: &str) -> Option<PublishedPlugin> {
        self.plugins
            .read()
            .await
            .iter()
            .find(|plugin| plugin.manifest.uuid == uuid)
            .cloned()
    }

    /// Snapshot of every published plugin
    pub async fn snapshot(&self) -> Vec<PublishedPlugin> {
        self.plugins.read().await.clone()
    }

    /// Bytes of a published plugin's archive, bumping its download count.
    /// `None` when the uuid is not published or its archive is missing.
    pub async fn download(&self, uuid: &str) -> Option<Vec<u8>> {
        self.get(uuid).await?;
        let path = self.plugins_root.join(uuid).join(BUNDLE_ZIP);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                self.downloads.increment(uuid).await;
                Some(bytes)
            }
            Err(err) => {
                error!("Could not read published archive {:?}: {}", path, err);
                None
            }
        }
    }

    /// Replace (or insert) the entry for a freshly published manifest.
    pub async fn on_published(&self, manifest: &PluginManifest) {
        let entry = self.build_entry(manifest.clone()).await;
        let mut plugins = self.plugins.write().await;
        plugins.retain(|plugin| plugin.manifest.uuid != manifest.uuid);
        plugins.push(entry);
    }

    /// Drop the entry for an unpublished uuid.
    pub async fn on_unpublished(&self, uuid: &str) {
        self.plugins
            .write()
            .await
            .retain(|plugin| plugin.manifest.uuid != uuid);
    }

    /// Rebuild the whole read model from the bundles on disk. Bundles
    /// without a readable manifest or without an archive are skipped.
    pub async fn reload(&self) {
        let mut loaded = Vec::new();

        if let Ok(read_dir) = std::fs::read_dir(&self.plugins_root) {
            for dir_entry in read_dir.filter_map(|entry| entry.ok()) {
                let bundle_dir = dir_entry.path();
                if !bundle_dir.is_dir() {
                    continue;
                }
                if !bundle_dir.join(BUNDLE_ZIP).is_file() {
                    continue;
                }
                let manifest_path = bundle_dir.join("manifest.json");
                let manifest = match tokio::fs::read_to_string(&manifest_path).await {
                    Ok(contents) => match PluginManifest::from_json(&contents) {
                        Ok(manifest) => manifest,
                        Err(err) => {
                            error!("Could not load bundle {:?}: {}", bundle_dir, err);
                            continue;
                        }
                    },
                    Err(err) => {
                        error!("Could not load bundle {:?}: {}", bundle_dir, err);
                        continue;
                    }
                };
                loaded.push(self.build_entry(manifest).await);
            }
        }

        *self.plugins.write().await = loaded;
    }

    /// Reload on a fixed cadence until shutdown fires.
    pub async fn reload_loop(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => self.reload().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn build_entry(&self, manifest: PluginManifest) -> PublishedPlugin {
        let download_count = self.downloads.get(&manifest.uuid).await;
        let last_updated = self.archive_mtime(&manifest.uuid);
        PublishedPlugin {
            manifest,
            last_updated,
            download_count,
        }
    }

    fn archive_mtime(&self, uuid: &str) -> DateTime<Utc> {
        self.plugins_root
            .join(uuid)
            .join(BUNDLE_ZIP)
            .metadata()
            .and_then(|meta| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest(uuid: &str) -> PluginManifest {
        PluginManifest {
            uuid: uuid.to_string(),
            name: "Sample".to_string(),
            author: "author".to_string(),
            description: "a sample".to_string(),
            version: "1.0.0".to_string(),
            game_version: "1.0".to_string(),
            runtime_version: 1,
            target_assembly: "Sample.dll".to_string(),
            repository_link: None,
            categories: Vec::new(),
            supported_game_version_ranges: Vec::new(),
        }
    }

    fn write_bundle(root: &std::path::Path, manifest: &PluginManifest) {
        let dir = root.join(&manifest.uuid);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(BUNDLE_ZIP), b"zip bytes").unwrap();
        std::fs::write(dir.join("manifest.json"), manifest.to_json().unwrap()).unwrap();
    }

    async fn catalog(root: &std::path::Path) -> PublishedCatalog {
        let downloads = Arc::new(DownloadCounter::load(root.join("counts.json")).await);
        PublishedCatalog::new(root.join("plugins"), downloads)
    }

    #[tokio::test]
    async fn test_reload_picks_up_complete_bundles_only() {
        let dir = tempfile::tempdir().unwrap();
        let plugins_root = dir.path().join("plugins");
        std::fs::create_dir_all(&plugins_root).unwrap();
        write_bundle(&plugins_root, &sample_manifest("p1"));
        // Bundle without an archive must be ignored.
        let incomplete = plugins_root.join("p2");
        std::fs::create_dir_all(&incomplete).unwrap();
        std::fs::write(
            incomplete.join("manifest.json"),
            sample_manifest("p2").to_json().unwrap(),
        )
        .unwrap();

        let catalog = catalog(dir.path()).await;
        catalog.reload().await;

        assert!(catalog.get("p1").await.is_some());
        assert!(catalog.get("p2").await.is_none());
        assert_eq!(catalog.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_replaces_and_unpublish_removes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plugins")).unwrap();
        let catalog = catalog(dir.path()).await;

        catalog.on_published(&sample_manifest("p1")).await;
        let mut bumped = sample_manifest("p1");
        bumped.version = "1.1.0".to_string();
        catalog.on_published(&bumped).await;

        let snapshot = catalog.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].manifest.version, "1.1.0");

        catalog.on_unpublished("p1").await;
        assert!(catalog.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_download_returns_bytes_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let plugins_root = dir.path().join("plugins");
        std::fs::create_dir_all(&plugins_root).unwrap();
        let manifest = sample_manifest("p1");
        write_bundle(&plugins_root, &manifest);

        let catalog = catalog(dir.path()).await;
        catalog.reload().await;

        assert_eq!(catalog.download("p1").await.unwrap(), b"zip bytes");
        assert_eq!(catalog.download("missing").await, None);

        catalog.reload().await;
        assert_eq!(catalog.get("p1").await.unwrap().download_count, 1);
    }
}
