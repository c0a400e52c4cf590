//! VCS synchronization
//!
//! The plugin source monorepo is kept current with plain `git`
//! subprocesses: fetch, hard-reset to the remote head, recursive submodule
//! sync. Failures are logged and never fatal — an update cycle proceeds
//! with whatever is on disk.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{error, info, warn};

/// Best-effort git synchronization of the source checkout.
pub struct GitSync {
    sources_dir: PathBuf,
    remote: Option<String>,
}

impl GitSync {
    pub fn new(sources_dir: impl Into<PathBuf>, remote: Option<String>) -> Self {
        Self {
            sources_dir: sources_dir.into(),
            remote,
        }
    }

    /// Clone the monorepo when no checkout exists yet. Without a configured
    /// remote, whatever is on disk is used as-is.
    pub async fn ensure_checkout(&self) {
        if self.sources_dir.join(".git").is_dir() {
            return;
        }
        let Some(remote) = self.remote.as_deref() else {
            warn!(
                "No checkout at {:?} and no remote configured; using the directory as-is",
                self.sources_dir
            );
            return;
        };

        info!("Cloning plugin sources from {}", remote);
        // git refuses to clone into a non-empty directory.
        let _ = tokio::fs::remove_dir_all(&self.sources_dir).await;
        let parent = self
            .sources_dir
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf();
        if let Err(err) = tokio::fs::create_dir_all(&parent).await {
            error!("Failed to prepare clone target: {}", err);
            return;
        }
        let target = self.sources_dir.to_string_lossy().into_owned();
        if let Err(err) = run_git(&["clone", "--recursive", remote, &target], &parent).await {
            error!("Failed to initialize git repository for plugins: {}", err);
        }
    }

    /// Fetch and hard-reset the checkout to the remote head, syncing
    /// submodules. Best effort: the first failing step aborts the pull,
    /// logged but not propagated.
    pub async fn pull(&self) {
        let steps: [&[&str]; 3] = [
            &["fetch", "origin"],
            &["reset", "--hard", "origin/HEAD"],
            &["submodule", "update", "--init", "--force", "--recursive"],
        ];
        for args in steps {
            if let Err(err) = run_git(args, &self.sources_dir).await {
                error!("Failed to pull plugins from git: {}", err);
                return;
            }
        }
    }
}

async fn run_git(args: &[&str], cwd: &Path) -> std::io::Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("git {} exited with {}: {}", args.join(" "), output.status, stderr.trim());
    }
    Ok(())
}
