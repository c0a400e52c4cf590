//! Runtime SDK registry and archive cache
//!
//! Build runtimes live under `runtimes/<id>/` as plain directories of SDK
//! files. The registry tracks which ids exist (rescanning on change
//! notifications, debounced so a multi-file drop settles before being
//! marked available), keeps the latest id handy for the compiler, and
//! packages a runtime's `download.zip` on first demand.
//!
//! Zip generation is single-flight per runtime directory: concurrent
//! callers for the same id attach to the in-flight build instead of
//! duplicating the work. The pending map is locked only around map
//! mutation, never around the packaging itself. A failed generation is not
//! cached — the next caller simply retries.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::ZipWriter;

use sdk::RepoError;

use crate::watch::{ChangeSource, PathChange};

/// Prefix of the runtime loader binaries, never redistributed in archives
pub const RUNTIME_LOADER_PREFIX: &str = "RuntimeLoader.";

/// Loader binary served to the client alongside the latest runtime
const RUNTIME_LOADER_FILE: &str = "RuntimeLoader.dll";

/// Name of a runtime's packaged archive inside its directory
pub const RUNTIME_ZIP_NAME: &str = "download.zip";

#[derive(Debug, Default)]
struct RuntimeState {
    /// id → whether its `download.zip` already exists
    available: HashMap<i32, bool>,
    latest_id: i32,
    loader_bytes: Arc<Vec<u8>>,
}

/// Registry of available build runtimes.
pub struct RuntimeRegistry {
    runtimes_root: PathBuf,
    settle_delay: Duration,
    state: RwLock<RuntimeState>,
    /// Single-flight gates, keyed by runtime directory
    pending_zips: StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl RuntimeRegistry {
    /// Create a registry over `runtimes_root`. Call
    /// [`RuntimeRegistry::reload`] before first use and
    /// [`RuntimeRegistry::watch`] to keep it current.
    pub fn new(runtimes_root: impl Into<PathBuf>, settle_delay: Duration) -> Self {
        Self {
            runtimes_root: runtimes_root.into(),
            settle_delay,
            state: RwLock::new(RuntimeState::default()),
            pending_zips: StdMutex::new(HashMap::new()),
        }
    }

    /// Directory holding the SDK files of one runtime
    pub fn runtime_dir(&self, id: i32) -> PathBuf {
        self.runtimes_root.join(id.to_string())
    }

    /// Highest runtime id currently known
    pub async fn latest_id(&self) -> i32 {
        self.state.read().await.latest_id
    }

    /// Ids of every known runtime
    pub async fn available(&self) -> Vec<i32> {
        self.state.read().await.available.keys().copied().collect()
    }

    /// In-memory copy of the latest runtime's loader binary
    pub async fn loader_bytes(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.state.read().await.loader_bytes)
    }

    /// Rescan the runtime storage directory from scratch.
    pub async fn reload(&self) {
        let mut available = HashMap::new();
        let mut latest_id = 0;

        if let Ok(read_dir) = std::fs::read_dir(&self.runtimes_root) {
            for entry in read_dir.filter_map(|entry| entry.ok()) {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let Some(id) = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(|name| name.parse::<i32>().ok())
                else {
                    continue;
                };
                available.insert(id, path.join(RUNTIME_ZIP_NAME).exists());
                latest_id = latest_id.max(id);
            }
        }

        let loader_path = self.runtime_dir(latest_id).join(RUNTIME_LOADER_FILE);
        let loader_bytes = match tokio::fs::read(&loader_path).await {
            Ok(bytes) => Arc::new(bytes),
            Err(_) if latest_id == 0 => Arc::new(Vec::new()),
            Err(err) => {
                warn!(
                    "Latest runtime loader not found at {:?}: {}",
                    loader_path, err
                );
                Arc::new(Vec::new())
            }
        };

        let mut state = self.state.write().await;
        state.available = available;
        state.latest_id = latest_id;
        state.loader_bytes = loader_bytes;
    }

    /// Keep the registry current from a change source. Newly created ids
    /// are given the settle delay before being marked available; removals
    /// take effect immediately.
    pub fn watch(self: Arc<Self>, source: &dyn ChangeSource) -> sdk::Result<()> {
        let mut rx = source.subscribe(&self.runtimes_root)?;
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                match change {
                    PathChange::Created(name) => {
                        let Ok(id) = name.parse::<i32>() else { continue };
                        let registry = Arc::clone(&self);
                        tokio::spawn(async move {
                            tokio::time::sleep(registry.settle_delay).await;
                            registry.mark_created(id).await;
                        });
                    }
                    PathChange::Removed(name) => {
                        let Ok(id) = name.parse::<i32>() else { continue };
                        self.mark_removed(id).await;
                    }
                }
            }
        });
        Ok(())
    }

    async fn mark_created(&self, id: i32) {
        let zip_ready = self.runtime_dir(id).join(RUNTIME_ZIP_NAME).exists();
        let mut state = self.state.write().await;
        state.available.insert(id, zip_ready);
        if id > state.latest_id {
            state.latest_id = id;
        }
        info!("Runtime {} was created on disk and is now available", id);
    }

    async fn mark_removed(&self, id: i32) {
        let mut state = self.state.write().await;
        state.available.remove(&id);
        if state.latest_id == id {
            state.latest_id = state.available.keys().copied().max().unwrap_or(0);
        }
        info!("Runtime {} was deleted from disk", id);
    }

    /// Return the path of the runtime's packaged archive, building it first
    /// if needed. Unknown ids fail with `NotFound`.
    pub async fn get_or_build_zip(&self, id: i32) -> sdk::Result<PathBuf> {
        {
            let state = self.state.read().await;
            match state.available.get(&id) {
                None => {
                    return Err(RepoError::NotFound(format!("runtime {id} is not available")))
                }
                Some(true) => return Ok(self.runtime_dir(id).join(RUNTIME_ZIP_NAME)),
                Some(false) => {}
            }
        }

        let zip_path = self.generate_zip(&self.runtime_dir(id)).await?;
        self.state.write().await.available.insert(id, true);
        Ok(zip_path)
    }

    /// Single-flight archive generation for one runtime directory.
    async fn generate_zip(&self, runtime_dir: &Path) -> sdk::Result<PathBuf> {
        let output_path = runtime_dir.join(RUNTIME_ZIP_NAME);
        if output_path.exists() {
            return Ok(output_path);
        }

        let gate = {
            let mut pending = self.pending_zips.lock().expect("pending map poisoned");
            Arc::clone(
                pending
                    .entry(runtime_dir.to_path_buf())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let result = {
            let _in_flight = gate.lock().await;
            if output_path.exists() {
                // A concurrent caller finished the build while we waited.
                Ok(output_path.clone())
            } else {
                let dir = runtime_dir.to_path_buf();
                let out = output_path.clone();
                match tokio::task::spawn_blocking(move || pack_runtime_dir(&dir, &out)).await {
                    Ok(packed) => packed,
                    Err(join_err) => Err(RepoError::PackagingFailure(join_err.to_string())),
                }
            }
        };

        // Failed attempts are forgotten so the next caller retries.
        self.pending_zips
            .lock()
            .expect("pending map poisoned")
            .remove(runtime_dir);

        if let Err(err) = &result {
            error!("Failed to generate runtime zip for {:?}: {}", runtime_dir, err);
        }
        result
    }
}

/// Stream every distributable file under `runtime_dir` into `output_path`.
/// Loader binaries, debug symbols, and any prior archive are excluded.
fn pack_runtime_dir(runtime_dir: &Path, output_path: &Path) -> sdk::Result<PathBuf> {
    let pack = || -> sdk::Result<()> {
        let file = std::fs::File::create(output_path)?;
        let mut writer = ZipWriter::new(file);
        let options: FileOptions = FileOptions::default();

        for entry in WalkDir::new(runtime_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(runtime_dir)
                .map_err(|e| RepoError::PackagingFailure(e.to_string()))?;
            let name = relative.to_string_lossy().replace('\\', "/");
            if name.starts_with(RUNTIME_LOADER_PREFIX)
                || name.ends_with(".pdb")
                || name == RUNTIME_ZIP_NAME
            {
                continue;
            }
            writer
                .start_file(name, options)
                .map_err(|e| RepoError::PackagingFailure(e.to_string()))?;
            let mut source = std::fs::File::open(entry.path())?;
            std::io::copy(&mut source, &mut writer)?;
        }
        writer
            .finish()
            .map_err(|e| RepoError::PackagingFailure(e.to_string()))?
            .flush()?;
        Ok(())
    };

    match pack() {
        Ok(()) => Ok(output_path.to_path_buf()),
        Err(err) => {
            // A truncated archive must not satisfy later existence checks.
            let _ = std::fs::remove_file(output_path);
            Err(err)
        }
    }
}
