//! Trust store
//!
//! Two independent trust axes gate distribution:
//!
//! - **Trusted developers** — authors whose submissions may be auto-trusted.
//! - **Trusted plugin uuids** — plugins opted into hash verification.
//!
//! Both allowlists are durable line-delimited files. On top of them sits a
//! process-lifetime hash cache: a hash offered by a client is verified
//! against the `hash.txt` recorded at last publish, and the answer —
//! positive or negative — is cached until an explicit reset.
//!
//! In-memory state lives behind a reader/writer lock. File mutations
//! serialize through a dedicated mutex distinct from that lock: the
//! allowlist files are a durability boundary shared across operations, and
//! a trust mutation that fails to persist rolls back its in-memory effect
//! so memory and disk never diverge beyond the instant of the write.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha512};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

use sdk::manifest::PluginManifest;
use sdk::RepoError;

use crate::paths::DataPaths;

/// Longest accepted developer id / plugin uuid, in bytes
const MAX_ID_LEN: usize = 24;

#[derive(Debug, Default)]
struct TrustState {
    developers: HashSet<String>,
    plugin_uuids: HashSet<String>,
    verified_hashes: HashSet<String>,
    rejected_hashes: HashSet<String>,
}

/// Developer/plugin allowlists plus the verified/rejected hash cache.
pub struct TrustStore {
    plugins_dir: PathBuf,
    developers_file: PathBuf,
    plugin_uuids_file: PathBuf,
    state: RwLock<TrustState>,
    /// Serializes every allowlist file write, independent of `state`
    file_lock: Mutex<()>,
}

impl TrustStore {
    /// Load both allowlists from disk. Missing files mean empty lists;
    /// unreadable files are logged and treated as empty.
    pub async fn load(paths: &DataPaths) -> Self {
        let developers_file = paths.trusted_developers_file();
        let plugin_uuids_file = paths.trusted_plugins_file();
        let state = TrustState {
            developers: read_allowlist(&developers_file).await,
            plugin_uuids: read_allowlist(&plugin_uuids_file).await,
            verified_hashes: HashSet::new(),
            rejected_hashes: HashSet::new(),
        };
        Self {
            plugins_dir: paths.plugins().to_path_buf(),
            developers_file,
            plugin_uuids_file,
            state: RwLock::new(state),
            file_lock: Mutex::new(()),
        }
    }

    /// Lowercase hex SHA-512 of `data` — the artifact hash format used
    /// everywhere in the repository.
    pub fn compute_hash(data: &[u8]) -> String {
        let mut hasher = Sha512::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Whether `uuid` is on the trusted-plugin allowlist.
    pub async fn is_plugin_trusted(&self, uuid: &str) -> bool {
        self.state.read().await.plugin_uuids.contains(uuid)
    }

    /// Whether `id` is on the trusted-developer allowlist.
    pub async fn is_developer_trusted(&self, id: &str) -> bool {
        self.state.read().await.developers.contains(id)
    }

    /// Whether a publish of `manifest` lands in trusted territory: either
    /// the plugin uuid is allowlisted or its author is.
    pub async fn is_trusted(&self, manifest: &PluginManifest) -> bool {
        let state = self.state.read().await;
        state.plugin_uuids.contains(&manifest.uuid) || state.developers.contains(&manifest.author)
    }

    /// Verify a client-offered hash for a trust-listed plugin.
    ///
    /// Fails fast when the uuid is not listed. Otherwise the rejected cache
    /// is consulted, then the verified cache; on a miss the published
    /// `hash.txt` is read and compared, and the outcome — match or not,
    /// including a missing file — is cached for the life of the process.
    pub async fn verify_by_hash(&self, hash: &str, uuid: &str) -> bool {
        {
            let state = self.state.read().await;
            if !state.plugin_uuids.contains(uuid) {
                return false;
            }
            if state.rejected_hashes.contains(hash) {
                return false;
            }
            if state.verified_hashes.contains(hash) {
                return true;
            }
        }

        let hash_path = self.plugins_dir.join(uuid).join("hash.txt");
        let recorded = tokio::fs::read_to_string(&hash_path).await.ok();
        match recorded {
            Some(contents) if contents.trim() == hash => {
                let mut state = self.state.write().await;
                state.verified_hashes.insert(hash.to_string());
                true
            }
            _ => {
                let mut state = self.state.write().await;
                state.rejected_hashes.insert(hash.to_string());
                false
            }
        }
    }

    /// Pre-seed the verified cache with a known-good hash. Used by the
    /// publisher after the artifact bytes are durably written, so trust
    /// survives a version bump without re-verification latency.
    pub async fn cache_verified_hash(&self, hash: &str) {
        self.state
            .write()
            .await
            .verified_hashes
            .insert(hash.to_string());
    }

    /// Snapshot of the trusted plugin uuids.
    pub async fn trusted_plugins(&self) -> Vec<String> {
        self.state.read().await.plugin_uuids.iter().cloned().collect()
    }

    /// Snapshot of the trusted developer ids.
    pub async fn trusted_developers(&self) -> Vec<String> {
        self.state.read().await.developers.iter().cloned().collect()
    }

    /// Add a plugin uuid to the trust list, optionally pre-seeding the
    /// verified cache with its current hash.
    ///
    /// Returns `Ok(false)` when the uuid was already listed. The uuid is
    /// appended to the durable allowlist; when the append fails the
    /// in-memory addition (and cache seed) is rolled back.
    pub async fn add_trusted_plugin(
        &self,
        uuid: &str,
        hash: Option<&str>,
    ) -> sdk::Result<bool> {
        validate_id(uuid)?;
        {
            let mut state = self.state.write().await;
            if !state.plugin_uuids.insert(uuid.to_string()) {
                return Ok(false);
            }
            if let Some(hash) = hash {
                state.verified_hashes.insert(hash.to_string());
            }
        }

        if let Err(err) = self.append_line(&self.plugin_uuids_file, uuid).await {
            let mut state = self.state.write().await;
            state.plugin_uuids.remove(uuid);
            if let Some(hash) = hash {
                state.verified_hashes.remove(hash);
            }
            error!("Failed to persist trusted plugin {}: {}", uuid, err);
            return Err(RepoError::Persistence(format!(
                "could not append trusted plugin {uuid}: {err}"
            )));
        }
        info!("Plugin {} added to the trust list", uuid);
        Ok(true)
    }

    /// Remove a plugin uuid from the trust list.
    ///
    /// Returns `Ok(false)` when the uuid was not listed. The allowlist file
    /// is rewritten in full; on success the entire verified cache is cleared
    /// (conservative global invalidation), on failure the removal is rolled
    /// back.
    pub async fn remove_trusted_plugin(&self, uuid: &str) -> sdk::Result<bool> {
        {
            let mut state = self.state.write().await;
            if !state.plugin_uuids.remove(uuid) {
                return Ok(false);
            }
        }

        let snapshot = self.trusted_plugins().await;
        if let Err(err) = self.rewrite_file(&self.plugin_uuids_file, &snapshot).await {
            self.state
                .write()
                .await
                .plugin_uuids
                .insert(uuid.to_string());
            error!("Failed to persist trusted plugin removal {}: {}", uuid, err);
            return Err(RepoError::Persistence(format!(
                "could not rewrite trusted plugin list: {err}"
            )));
        }
        self.state.write().await.verified_hashes.clear();
        info!("Plugin {} removed from the trust list", uuid);
        Ok(true)
    }

    /// Add a developer id to the trust list. Same persistence contract as
    /// [`TrustStore::add_trusted_plugin`], with a full file rewrite.
    pub async fn add_trusted_developer(&self, id: &str) -> sdk::Result<bool> {
        validate_id(id)?;
        {
            let mut state = self.state.write().await;
            if !state.developers.insert(id.to_string()) {
                return Ok(false);
            }
        }

        let snapshot = self.trusted_developers().await;
        if let Err(err) = self.rewrite_file(&self.developers_file, &snapshot).await {
            self.state.write().await.developers.remove(id);
            error!("Failed to persist trusted developer {}: {}", id, err);
            return Err(RepoError::Persistence(format!(
                "could not rewrite trusted developer list: {err}"
            )));
        }
        info!("Developer {} added to the trust list", id);
        Ok(true)
    }

    /// Remove a developer id from the trust list.
    pub async fn remove_trusted_developer(&self, id: &str) -> sdk::Result<bool> {
        {
            let mut state = self.state.write().await;
            if !state.developers.remove(id) {
                return Ok(false);
            }
        }

        let snapshot = self.trusted_developers().await;
        if let Err(err) = self.rewrite_file(&self.developers_file, &snapshot).await {
            self.state.write().await.developers.insert(id.to_string());
            error!("Failed to persist trusted developer removal {}: {}", id, err);
            return Err(RepoError::Persistence(format!(
                "could not rewrite trusted developer list: {err}"
            )));
        }
        info!("Developer {} removed from the trust list", id);
        Ok(true)
    }

    /// Drop every cached hash answer. The next verification for any pair
    /// goes back to `hash.txt` on disk.
    pub async fn reset_cache(&self) {
        let mut state = self.state.write().await;
        state.verified_hashes.clear();
        state.rejected_hashes.clear();
    }

    async fn append_line(&self, file: &Path, line: &str) -> std::io::Result<()> {
        let _guard = self.file_lock.lock().await;
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .await?;
        handle.write_all(format!("{line}\n").as_bytes()).await?;
        handle.flush().await
    }

    async fn rewrite_file(&self, file: &Path, lines: &[String]) -> std::io::Result<()> {
        let _guard = self.file_lock.lock().await;
        let mut contents = lines.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        tokio::fs::write(file, contents).await
    }
}

fn validate_id(id: &str) -> sdk::Result<()> {
    if id.len() > MAX_ID_LEN {
        return Err(RepoError::Validation(format!(
            "identifier is too long: {} bytes (max {MAX_ID_LEN})",
            id.len()
        )));
    }
    Ok(())
}

async fn read_allowlist(file: &Path) -> HashSet<String> {
    match tokio::fs::read_to_string(file).await {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
        Err(err) => {
            error!("Failed to load allowlist {:?}: {}", file, err);
            HashSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(dir: &std::path::Path) -> TrustStore {
        let paths = DataPaths::new(dir.join("data")).unwrap();
        TrustStore::load(&paths).await
    }

    #[tokio::test]
    async fn test_compute_hash_is_lowercase_hex_sha512() {
        let hash = TrustStore::compute_hash(b"abc");
        assert_eq!(hash.len(), 128);
        assert_eq!(hash, hash.to_lowercase());
        assert!(hash.starts_with("ddaf35a193617aba"));
    }

    #[tokio::test]
    async fn test_add_is_durable_and_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path().join("data")).unwrap();

        let store = TrustStore::load(&paths).await;
        assert!(store.add_trusted_plugin("p1", None).await.unwrap());
        assert!(!store.add_trusted_plugin("p1", None).await.unwrap());
        assert!(store.add_trusted_developer("dev1").await.unwrap());

        let reloaded = TrustStore::load(&paths).await;
        assert!(reloaded.is_plugin_trusted("p1").await);
        assert!(reloaded.is_developer_trusted("dev1").await);
    }

    #[tokio::test]
    async fn test_oversized_identifier_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path()).await;
        let long_id = "x".repeat(MAX_ID_LEN + 1);
        assert!(matches!(
            store.add_trusted_plugin(&long_id, None).await,
            Err(RepoError::Validation(_))
        ));
        assert!(!store.is_plugin_trusted(&long_id).await);
    }

    #[tokio::test]
    async fn test_failed_append_rolls_back_memory() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path().join("data")).unwrap();
        // A directory squatting on the allowlist path makes the append fail.
        std::fs::create_dir(paths.trusted_plugins_file()).unwrap();

        let store = TrustStore::load(&paths).await;
        assert!(matches!(
            store.add_trusted_plugin("p1", Some("h1")).await,
            Err(RepoError::Persistence(_))
        ));
        assert!(!store.is_plugin_trusted("p1").await);
    }

    #[tokio::test]
    async fn test_remove_clears_verified_cache() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path().join("data")).unwrap();
        let store = TrustStore::load(&paths).await;

        store.add_trusted_plugin("p1", Some("cached")).await.unwrap();
        store.add_trusted_plugin("p2", None).await.unwrap();
        assert!(store.verify_by_hash("cached", "p1").await);

        assert!(store.remove_trusted_plugin("p1").await.unwrap());
        // p1 is no longer listed at all; p2 verification starts from disk.
        assert!(!store.verify_by_hash("cached", "p1").await);

        let reloaded = TrustStore::load(&paths).await;
        assert!(!reloaded.is_plugin_trusted("p1").await);
        assert!(reloaded.is_plugin_trusted("p2").await);
    }
}
