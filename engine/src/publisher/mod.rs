//! Artifact publishing
//!
//! The publisher materializes a successful compile into the on-disk bundle
//! for its uuid: `download.zip`, `manifest.json`, `hash.txt`, optional
//! icon/banner, and the `assets/` directory. Publishing is an overwrite
//! strategy, not a transaction — a mid-publish crash can leave a partially
//! updated bundle, which the next successful publish fully supersedes.
//!
//! Trust-cache seeding for an already-trusted uuid happens strictly after
//! the artifact writes, so a reader can never observe "trusted" for bytes
//! that are not yet durable.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use sdk::types::CompilationResult;

use crate::paths::DataPaths;
use crate::published::PublishedCatalog;
use crate::trust::TrustStore;

/// Bundle file names
const BUNDLE_ZIP: &str = "download.zip";
const BUNDLE_MANIFEST: &str = "manifest.json";
const BUNDLE_HASH: &str = "hash.txt";
const BUNDLE_ICON: &str = "icon.png";
const BUNDLE_BANNER: &str = "banner.png";
const BUNDLE_ASSETS: &str = "assets";

/// Writes compile results into published artifact bundles.
pub struct Publisher {
    paths: DataPaths,
    trust: Arc<TrustStore>,
    published: Arc<PublishedCatalog>,
    unpublish_retries: u32,
    unpublish_retry_delay: Duration,
}

impl Publisher {
    pub fn new(
        paths: DataPaths,
        trust: Arc<TrustStore>,
        published: Arc<PublishedCatalog>,
        unpublish_retries: u32,
        unpublish_retry_delay: Duration,
    ) -> Self {
        Self {
            paths,
            trust,
            published,
            unpublish_retries,
            unpublish_retry_delay,
        }
    }

    /// Publish a compile result. A failed result (or one without a
    /// manifest) is a logged no-op; I/O problems are logged and leave
    /// whatever subset of the bundle was written, to be overwritten by the
    /// next successful publish.
    pub async fn publish(&self, result: &CompilationResult) {
        let Some(manifest) = result.manifest.as_ref().filter(|_| result.success) else {
            error!("Refusing to publish plugin from a failed compilation");
            return;
        };

        if let Err(err) = self.write_bundle(manifest, result).await {
            error!("Failed to publish plugin {}: {}", manifest.uuid, err);
            return;
        }

        // Artifact bytes are durable; trust may now recognize the new hash.
        if self.trust.is_trusted(manifest).await {
            self.trust.cache_verified_hash(&result.artifact_hash).await;
        }
        self.published.on_published(manifest).await;
        info!(
            "Published plugin {} ({} v{})",
            manifest.uuid, manifest.name, manifest.version
        );
    }

    async fn write_bundle(
        &self,
        manifest: &sdk::PluginManifest,
        result: &CompilationResult,
    ) -> std::io::Result<()> {
        let bundle_dir = self.paths.published_plugin_dir(&manifest.uuid);
        tokio::fs::create_dir_all(&bundle_dir).await?;

        tokio::fs::write(bundle_dir.join(BUNDLE_ZIP), &result.zipped_plugin).await?;
        let manifest_json = manifest
            .to_json()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        tokio::fs::write(bundle_dir.join(BUNDLE_MANIFEST), manifest_json).await?;
        tokio::fs::write(bundle_dir.join(BUNDLE_HASH), &result.artifact_hash).await?;

        replace_media(result.icon_path.as_deref(), &bundle_dir.join(BUNDLE_ICON)).await?;
        replace_media(result.banner_path.as_deref(), &bundle_dir.join(BUNDLE_BANNER)).await?;

        // Wholesale replacement: stale assets must not outlive the publish.
        let published_assets = bundle_dir.join(BUNDLE_ASSETS);
        if published_assets.is_dir() {
            tokio::fs::remove_dir_all(&published_assets).await?;
        }
        if let Some(assets_path) = result.assets_path.as_deref().filter(|path| path.is_dir()) {
            let source = assets_path.to_path_buf();
            let dest = published_assets.clone();
            tokio::task::spawn_blocking(move || copy_dir_recursive(&source, &dest))
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))??;
        }
        Ok(())
    }

    /// Stop advertising a uuid and delete its bundle from disk.
    ///
    /// The catalog entry is removed immediately; the physical deletion is
    /// retried a bounded number of times with a fixed delay to ride out
    /// transient file locks, then given up silently.
    pub async fn unpublish(&self, uuid: &str) {
        self.published.on_unpublished(uuid).await;

        let bundle_dir = self.paths.published_plugin_dir(uuid);
        for _attempt in 0..self.unpublish_retries {
            if !bundle_dir.exists() {
                info!("Unpublished plugin {}", uuid);
                return;
            }
            match tokio::fs::remove_dir_all(&bundle_dir).await {
                Ok(()) => {
                    info!("Unpublished plugin {}", uuid);
                    return;
                }
                Err(err) => {
                    error!("Failed to unpublish plugin {}: {}", uuid, err);
                }
            }
            tokio::time::sleep(self.unpublish_retry_delay).await;
        }
        warn!(
            "Giving up deleting bundle for {}; it is no longer advertised",
            uuid
        );
    }
}

async fn replace_media(source: Option<&Path>, dest: &Path) -> std::io::Result<()> {
    match source.filter(|path| path.is_file()) {
        Some(source) => {
            tokio::fs::copy(source, dest).await?;
        }
        None => {
            if dest.is_file() {
                tokio::fs::remove_file(dest).await?;
            }
        }
    }
    Ok(())
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
