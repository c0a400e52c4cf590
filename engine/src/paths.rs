//! Data directory layout
//!
//! Everything the repository keeps on disk lives under one data directory:
//!
//! - `plugin_sources/` — the monorepo checkout of plugin source projects
//! - `plugins/<uuid>/` — published artifact bundles
//! - `runtimes/<id>/` — build runtime SDKs and their packaged archives
//! - flat allowlist/counter files at the top level

use std::io;
use std::path::{Path, PathBuf};

/// Resolved locations for the repository's on-disk state.
///
/// Construction creates the three content directories if they are missing,
/// so every component can assume its root exists.
#[derive(Debug, Clone)]
pub struct DataPaths {
    data: PathBuf,
    plugin_sources: PathBuf,
    plugins: PathBuf,
    runtimes: PathBuf,
}

impl DataPaths {
    /// Resolve the layout under `data_dir`, creating missing directories.
    pub fn new(data_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let data = data_dir.into();
        let plugin_sources = data.join("plugin_sources");
        let plugins = data.join("plugins");
        let runtimes = data.join("runtimes");
        std::fs::create_dir_all(&plugin_sources)?;
        std::fs::create_dir_all(&plugins)?;
        std::fs::create_dir_all(&runtimes)?;
        Ok(Self {
            data,
            plugin_sources,
            plugins,
            runtimes,
        })
    }

    /// The data directory root
    pub fn data(&self) -> &Path {
        &self.data
    }

    /// Root of the plugin source monorepo checkout
    pub fn plugin_sources(&self) -> &Path {
        &self.plugin_sources
    }

    /// Root of the published artifact bundles
    pub fn plugins(&self) -> &Path {
        &self.plugins
    }

    /// Root of the runtime SDK directories
    pub fn runtimes(&self) -> &Path {
        &self.runtimes
    }

    /// Artifact bundle directory for one published plugin
    pub fn published_plugin_dir(&self, uuid: &str) -> PathBuf {
        self.plugins.join(uuid)
    }

    /// Durable allowlist of trusted developer ids
    pub fn trusted_developers_file(&self) -> PathBuf {
        self.data.join("trusted_developers.txt")
    }

    /// Durable allowlist of trusted plugin uuids
    pub fn trusted_plugins_file(&self) -> PathBuf {
        self.data.join("trusted_plugin_uuids.txt")
    }

    /// JSON map of per-plugin download counts
    pub fn download_counts_file(&self) -> PathBuf {
        self.data.join("download_counts.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path().join("data")).unwrap();
        assert!(paths.plugin_sources().is_dir());
        assert!(paths.plugins().is_dir());
        assert!(paths.runtimes().is_dir());
        assert_eq!(
            paths.published_plugin_dir("abc"),
            dir.path().join("data").join("plugins").join("abc")
        );
    }
}
