//! Source tree discovery
//!
//! The catalog scans the plugin source monorepo into uuid-indexed entries
//! and tells subscribers what changed. Each immediate subdirectory of the
//! source root is a solution; the first nested directory containing a
//! `manifest.json` is its project. Deltas are delivered over subscriber
//! channels strictly after the catalog's own lock is released, so a
//! subscriber may query the catalog from inside its handler without
//! deadlocking.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::{mpsc, RwLock};
use tracing::{error, warn};

use sdk::manifest::PluginManifest;
use sdk::RepoError;

/// Directory names that are VCS/IDE metadata, never plugin solutions
const METADATA_DIRS: [&str; 3] = [".git", ".vs", ".idea"];

/// One discovered plugin source: a solution directory, the project inside
/// it, and the manifest as last parsed.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Solution directory (immediate child of the source root)
    pub solution_dir: PathBuf,
    /// Project directory containing `manifest.json`
    pub project_dir: PathBuf,
    /// Manifest as of the last scan or refresh
    pub manifest: PluginManifest,
}

impl SourceEntry {
    /// Path of the project's manifest file
    pub fn manifest_path(&self) -> PathBuf {
        self.project_dir.join("manifest.json")
    }

    /// Path of the project's asset folder
    pub fn assets_dir(&self) -> PathBuf {
        self.project_dir.join("Assets")
    }

    /// Re-read the manifest from disk, replacing the in-memory snapshot.
    pub fn refresh_manifest(&mut self) -> sdk::Result<()> {
        let path = self.manifest_path();
        let contents = std::fs::read_to_string(&path).map_err(|_| {
            RepoError::Validation(format!("manifest not found at {}", path.display()))
        })?;
        self.manifest = PluginManifest::from_json(&contents)
            .map_err(|e| RepoError::Validation(format!("invalid manifest {}: {e}", path.display())))?;
        Ok(())
    }

    /// Read a solution directory into an entry: the first nested directory
    /// containing a `manifest.json` wins.
    fn read_from(solution_dir: &Path) -> sdk::Result<Self> {
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(solution_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        for project_dir in dirs {
            let manifest_path = project_dir.join("manifest.json");
            if !manifest_path.exists() {
                continue;
            }
            let contents = std::fs::read_to_string(&manifest_path)?;
            let manifest = PluginManifest::from_json(&contents).map_err(|e| {
                RepoError::Validation(format!(
                    "invalid manifest {}: {e}",
                    manifest_path.display()
                ))
            })?;
            return Ok(Self {
                solution_dir: solution_dir.to_path_buf(),
                project_dir,
                manifest,
            });
        }
        Err(RepoError::Validation(format!(
            "no project with a manifest.json inside {}",
            solution_dir.display()
        )))
    }
}

/// A change observed between catalog scans.
#[derive(Debug, Clone)]
pub enum SourceDelta {
    /// A source is new or its manifest version changed
    Updated(SourceEntry),
    /// A source disappeared; carries its last known registration
    Removed(SourceEntry),
}

/// Uuid-indexed registry of discovered plugin sources.
pub struct SourceCatalog {
    sources_root: PathBuf,
    entries: RwLock<HashMap<String, SourceEntry>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SourceDelta>>>,
}

impl SourceCatalog {
    /// Create an empty catalog over `sources_root`. Nothing is scanned
    /// until [`SourceCatalog::reload_all`] runs.
    pub fn new(sources_root: impl Into<PathBuf>) -> Self {
        Self {
            sources_root: sources_root.into(),
            entries: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to catalog deltas. Events are buffered without bound until
    /// received; dropping the receiver ends the subscription.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SourceDelta> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .push(tx);
        rx
    }

    /// Rescan the whole source root, swap in the new registry, and emit one
    /// `Removed` per vanished uuid plus one `Updated` per new or
    /// version-changed uuid.
    pub async fn reload_all(&self) {
        let mut new_entries: HashMap<String, SourceEntry> = HashMap::new();

        let read_dir = match std::fs::read_dir(&self.sources_root) {
            Ok(read_dir) => read_dir,
            Err(err) => {
                error!(
                    "Failed to enumerate source root {:?}: {}",
                    self.sources_root, err
                );
                return;
            }
        };
        let mut solution_dirs: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && !is_metadata_dir(path))
            .collect();
        solution_dirs.sort();

        for solution_dir in solution_dirs {
            match SourceEntry::read_from(&solution_dir) {
                Ok(entry) => {
                    if let Some(previous) =
                        new_entries.insert(entry.manifest.uuid.clone(), entry)
                    {
                        warn!(
                            "Duplicate plugin uuid {} in {:?}; keeping the later scan",
                            previous.manifest.uuid, previous.solution_dir
                        );
                    }
                }
                Err(err) => {
                    error!("Plugin source could not be read: {}", err);
                }
            }
        }

        let mut deltas = Vec::new();
        {
            let mut entries = self.entries.write().await;
            for (uuid, old_entry) in entries.iter() {
                if !new_entries.contains_key(uuid) {
                    deltas.push(SourceDelta::Removed(old_entry.clone()));
                }
            }
            for (uuid, new_entry) in new_entries.iter() {
                let changed = match entries.get(uuid) {
                    Some(old_entry) => old_entry.manifest.version != new_entry.manifest.version,
                    None => true,
                };
                if changed {
                    deltas.push(SourceDelta::Updated(new_entry.clone()));
                }
            }
            *entries = new_entries;
        }
        // Lock released; subscribers may re-enter the catalog freely.
        self.emit(deltas);
    }

    /// Rescan a single solution directory.
    ///
    /// A vanished directory removes its registration (emitting `Removed`);
    /// a parse failure leaves the previous registration untouched. Emits
    /// `Updated` exactly once when the source is new or its version
    /// changed. Returns whether the rescan took effect.
    pub async fn reload_one(&self, solution_dir: &Path) -> bool {
        if is_metadata_dir(solution_dir) {
            return false;
        }

        let old_entry = {
            let entries = self.entries.read().await;
            entries
                .values()
                .find(|entry| entry.solution_dir == solution_dir)
                .cloned()
        };

        if !solution_dir.exists() {
            let removed = match &old_entry {
                Some(old_entry) => {
                    self.entries.write().await.remove(&old_entry.manifest.uuid);
                    true
                }
                None => false,
            };
            if removed {
                if let Some(old_entry) = old_entry {
                    self.emit(vec![SourceDelta::Removed(old_entry)]);
                }
            }
            return true;
        }

        let new_entry = match SourceEntry::read_from(solution_dir) {
            Ok(entry) => entry,
            Err(err) => {
                error!("Plugin source could not be read: {}", err);
                return false;
            }
        };

        {
            let mut entries = self.entries.write().await;
            if let Some(old_entry) = &old_entry {
                entries.remove(&old_entry.manifest.uuid);
            }
            entries.insert(new_entry.manifest.uuid.clone(), new_entry.clone());
        }

        let changed = match &old_entry {
            Some(old_entry) => old_entry.manifest.version != new_entry.manifest.version,
            None => true,
        };
        if changed {
            self.emit(vec![SourceDelta::Updated(new_entry)]);
        }
        true
    }

    /// Rescan the solution registered for `uuid`, if any.
    pub async fn reload_by_uuid(&self, uuid: &str) -> bool {
        let solution_dir = {
            let entries = self.entries.read().await;
            entries.get(uuid).map(|entry| entry.solution_dir.clone())
        };
        match solution_dir {
            Some(solution_dir) => self.reload_one(&solution_dir).await,
            None => false,
        }
    }

    /// Point-in-time snapshot of every registered source.
    pub async fn snapshot(&self) -> Vec<SourceEntry> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Look up one source by uuid.
    pub async fn get(&self, uuid: &str) -> Option<SourceEntry> {
        self.entries.read().await.get(uuid).cloned()
    }

    fn emit(&self, deltas: Vec<SourceDelta>) {
        if deltas.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock().expect("subscriber registry poisoned");
        subscribers.retain(|tx| {
            deltas
                .iter()
                .all(|delta| tx.send(delta.clone()).is_ok())
        });
    }
}

fn is_metadata_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| METADATA_DIRS.contains(&name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_source(root: &Path, dir_name: &str, uuid: &str, version: &str) -> PathBuf {
        let project = root.join(dir_name).join("project");
        std::fs::create_dir_all(&project).unwrap();
        let manifest = format!(
            r#"{{
                "uuid": "{uuid}",
                "plugin_name": "{dir_name}",
                "plugin_author": "author",
                "plugin_description": "test plugin",
                "plugin_version": "{version}",
                "game_version": "1.0",
                "runtime_version": 1,
                "target_assembly": "{dir_name}.dll"
            }}"#
        );
        std::fs::write(project.join("manifest.json"), manifest).unwrap();
        root.join(dir_name)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SourceDelta>) -> Vec<SourceDelta> {
        let mut deltas = Vec::new();
        while let Ok(delta) = rx.try_recv() {
            deltas.push(delta);
        }
        deltas
    }

    #[tokio::test]
    async fn test_initial_scan_emits_updated_per_source() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "alpha", "uuid-a", "1.0.0");
        write_source(dir.path(), "beta", "uuid-b", "2.0.0");
        std::fs::create_dir(dir.path().join(".git")).unwrap();

        let catalog = SourceCatalog::new(dir.path());
        let mut rx = catalog.subscribe();
        catalog.reload_all().await;

        let deltas = drain(&mut rx);
        assert_eq!(deltas.len(), 2);
        assert!(deltas
            .iter()
            .all(|delta| matches!(delta, SourceDelta::Updated(_))));
        assert_eq!(catalog.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_version_bump_emits_exactly_one_updated() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "alpha", "uuid-a", "1.0.0");

        let catalog = SourceCatalog::new(dir.path());
        catalog.reload_all().await;

        let mut rx = catalog.subscribe();
        write_source(dir.path(), "alpha", "uuid-a", "1.0.1");
        catalog.reload_all().await;

        let deltas = drain(&mut rx);
        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            SourceDelta::Updated(entry) => {
                assert_eq!(entry.manifest.uuid, "uuid-a");
                assert_eq!(entry.manifest.version, "1.0.1");
            }
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unchanged_source_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "alpha", "uuid-a", "1.0.0");

        let catalog = SourceCatalog::new(dir.path());
        catalog.reload_all().await;

        let mut rx = catalog.subscribe();
        catalog.reload_all().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_deleted_source_emits_exactly_one_removed() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "alpha", "uuid-a", "1.0.0");
        let beta_dir = write_source(dir.path(), "beta", "uuid-b", "1.0.0");

        let catalog = SourceCatalog::new(dir.path());
        catalog.reload_all().await;

        let mut rx = catalog.subscribe();
        std::fs::remove_dir_all(&beta_dir).unwrap();
        catalog.reload_all().await;

        let deltas = drain(&mut rx);
        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            SourceDelta::Removed(entry) => assert_eq!(entry.manifest.uuid, "uuid-b"),
            other => panic!("expected Removed, got {other:?}"),
        }
        assert!(catalog.get("uuid-b").await.is_none());
        assert!(catalog.get("uuid-a").await.is_some());
    }

    #[tokio::test]
    async fn test_malformed_manifest_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), "alpha", "uuid-a", "1.0.0");
        let broken = dir.path().join("broken").join("project");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join("manifest.json"), "{ not json").unwrap();

        let catalog = SourceCatalog::new(dir.path());
        catalog.reload_all().await;

        let snapshot = catalog.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].manifest.uuid, "uuid-a");
    }

    #[tokio::test]
    async fn test_reload_one_emits_updated_once() {
        let dir = tempfile::tempdir().unwrap();
        let alpha_dir = write_source(dir.path(), "alpha", "uuid-a", "1.0.0");

        let catalog = SourceCatalog::new(dir.path());
        catalog.reload_all().await;

        let mut rx = catalog.subscribe();
        write_source(dir.path(), "alpha", "uuid-a", "1.1.0");
        assert!(catalog.reload_one(&alpha_dir).await);

        let deltas = drain(&mut rx);
        assert_eq!(deltas.len(), 1, "version change must emit exactly one delta");
        assert!(matches!(&deltas[0], SourceDelta::Updated(entry)
            if entry.manifest.version == "1.1.0"));
    }

    #[tokio::test]
    async fn test_reload_one_parse_failure_keeps_registration() {
        let dir = tempfile::tempdir().unwrap();
        let alpha_dir = write_source(dir.path(), "alpha", "uuid-a", "1.0.0");

        let catalog = SourceCatalog::new(dir.path());
        catalog.reload_all().await;

        std::fs::write(
            alpha_dir.join("project").join("manifest.json"),
            "{ corrupted",
        )
        .unwrap();
        assert!(!catalog.reload_one(&alpha_dir).await);
        assert!(catalog.get("uuid-a").await.is_some());
    }

    #[tokio::test]
    async fn test_reload_one_missing_dir_removes_registration() {
        let dir = tempfile::tempdir().unwrap();
        let alpha_dir = write_source(dir.path(), "alpha", "uuid-a", "1.0.0");

        let catalog = SourceCatalog::new(dir.path());
        catalog.reload_all().await;

        let mut rx = catalog.subscribe();
        std::fs::remove_dir_all(&alpha_dir).unwrap();
        assert!(catalog.reload_one(&alpha_dir).await);

        let deltas = drain(&mut rx);
        assert_eq!(deltas.len(), 1);
        assert!(matches!(&deltas[0], SourceDelta::Removed(_)));
        assert!(catalog.get("uuid-a").await.is_none());
    }
}
