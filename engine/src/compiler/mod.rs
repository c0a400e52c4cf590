//! External toolchain invocation
//!
//! Compiling a plugin means driving the external build toolchain over its
//! solution: a clean pass, then a build pass, both as subprocesses with
//! captured output. Success is determined solely by the sentinel file the
//! build's own post-build step writes — never by exit code, which can be
//! zero on a partially broken build.
//!
//! Every failure mode folds into a failed [`CompilationResult`] carrying
//! the build log; `compile` never panics or errors across its public
//! boundary, so one broken source cannot abort a batch.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tokio::sync::watch;
use tracing::error;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::ZipWriter;

use sdk::types::CompilationResult;
use sdk::RepoError;

use crate::catalog::SourceEntry;
use crate::config::ToolchainConfig;
use crate::runtimes::{RuntimeRegistry, RUNTIME_LOADER_PREFIX};
use crate::trust::TrustStore;

/// Marker file the build's post-build step writes on success
pub const BUILD_SENTINEL: &str = "BuildSuccessful.txt";

/// Environment variable marking the build as a server build
const ENV_SERVER_BUILD: &str = "SERVER_PLUGIN_BUILD";

/// Environment variable pointing the build at the runtime SDK directory
const ENV_SERVER_RUNTIME: &str = "SERVER_PLUGIN_RUNTIME";

/// Icon file a project may ship in its asset folder
const ICON_ASSET: &str = "PluginIcon.png";

/// Banner file a project may ship in its asset folder
const BANNER_ASSET: &str = "PluginBanner.png";

enum StageOutcome {
    Completed(String),
    Cancelled,
}

/// Drives the external toolchain for one source entry at a time.
pub struct Compiler {
    toolchain: ToolchainConfig,
    runtimes: Arc<RuntimeRegistry>,
}

impl Compiler {
    pub fn new(toolchain: ToolchainConfig, runtimes: Arc<RuntimeRegistry>) -> Self {
        Self {
            toolchain,
            runtimes,
        }
    }

    /// Compile against the latest known runtime.
    pub async fn compile(
        &self,
        entry: &SourceEntry,
        cancel: watch::Receiver<bool>,
    ) -> CompilationResult {
        self.compile_with_runtime(entry, None, cancel).await
    }

    /// Compile against a specific runtime, or the latest when `None`.
    ///
    /// The entry's manifest is re-read from disk first so a stale catalog
    /// snapshot cannot publish outdated metadata.
    pub async fn compile_with_runtime(
        &self,
        entry: &SourceEntry,
        runtime_override: Option<i32>,
        cancel: watch::Receiver<bool>,
    ) -> CompilationResult {
        let mut entry = entry.clone();
        if let Err(err) = entry.refresh_manifest() {
            error!(
                "Failed to compile plugin {} in {:?}: {}",
                entry.manifest.name, entry.solution_dir, err
            );
            return CompilationResult::failed(
                format!("Manifest not found: {err}"),
                Some(entry.manifest.clone()),
            );
        }

        let runtime_version = match runtime_override {
            Some(id) => id,
            None => self.runtimes.latest_id().await,
        };

        match self.run_pipeline(&entry, runtime_version, cancel).await {
            Ok(result) => result,
            Err(err) => {
                error!(
                    "Failed to compile plugin {} in {:?}: {}",
                    entry.manifest.name, entry.solution_dir, err
                );
                CompilationResult::failed(
                    format!("Failed to compile plugin: {err}"),
                    Some(entry.manifest.clone()),
                )
            }
        }
    }

    async fn run_pipeline(
        &self,
        entry: &SourceEntry,
        runtime_version: i32,
        cancel: watch::Receiver<bool>,
    ) -> sdk::Result<CompilationResult> {
        let manifest = &entry.manifest;
        let (built, build_log) = self
            .run_toolchain(&entry.solution_dir, runtime_version, cancel)
            .await?;
        if !built {
            error!(
                "Failed to compile plugin {} in {:?}",
                manifest.name, entry.solution_dir
            );
            return Ok(CompilationResult::failed(build_log, Some(manifest.clone())));
        }

        let output_dir = entry.project_dir.join(&self.toolchain.build_output_dir);
        let assembly_path = output_dir.join(&manifest.target_assembly);
        if !assembly_path.is_file() {
            error!(
                "Failed to compile plugin {} in {:?}: target assembly ({}) not found",
                manifest.name, entry.solution_dir, manifest.target_assembly
            );
            return Ok(CompilationResult::failed(
                format!(
                    "{build_log}\n\nTarget assembly not found: {}",
                    manifest.target_assembly
                ),
                Some(manifest.clone()),
            ));
        }

        let assembly_bytes = tokio::fs::read(&assembly_path).await?;
        let artifact_hash = TrustStore::compute_hash(&assembly_bytes);

        let published_manifest = manifest.copy_with_runtime(runtime_version);
        let manifest_json = published_manifest
            .to_json()
            .map_err(|e| RepoError::Validation(e.to_string()))?;

        let assets_dir = entry.assets_dir();
        let zipped_plugin = {
            let output_dir = output_dir.clone();
            let assets_dir = assets_dir.clone();
            let manifest_json = manifest_json.clone();
            tokio::task::spawn_blocking(move || {
                package_plugin(&output_dir, &assets_dir, &manifest_json)
            })
            .await
            .map_err(|e| RepoError::PackagingFailure(e.to_string()))??
        };

        // The source tree records the runtime the plugin was actually
        // built for, so the next scan sees a consistent manifest.
        tokio::fs::write(entry.manifest_path(), &manifest_json).await?;

        let icon_path = existing_file(assets_dir.join(ICON_ASSET));
        let banner_path = existing_file(assets_dir.join(BANNER_ASSET));
        let assets_path = assets_dir.is_dir().then_some(assets_dir);

        Ok(CompilationResult {
            success: true,
            build_log,
            artifact_hash,
            manifest: Some(published_manifest),
            zipped_plugin,
            icon_path,
            banner_path,
            assets_path,
        })
    }

    /// Run the clean and build passes. Returns whether the success sentinel
    /// was written and the captured build log.
    async fn run_toolchain(
        &self,
        solution_dir: &Path,
        runtime_version: i32,
        mut cancel: watch::Receiver<bool>,
    ) -> sdk::Result<(bool, String)> {
        let sentinel = solution_dir.join(BUILD_SENTINEL);
        if sentinel.exists() {
            tokio::fs::remove_file(&sentinel).await?;
        }
        let runtime_dir = self.runtimes.runtime_dir(runtime_version);

        // Clean output is not part of the build log.
        let clean = self
            .run_stage(&self.toolchain.clean_args, solution_dir, &runtime_dir, &mut cancel)
            .await?;
        if matches!(clean, StageOutcome::Cancelled) {
            return Ok((false, "Compilation cancelled".to_string()));
        }

        match self
            .run_stage(&self.toolchain.build_args, solution_dir, &runtime_dir, &mut cancel)
            .await?
        {
            StageOutcome::Completed(build_log) => Ok((sentinel.exists(), build_log)),
            StageOutcome::Cancelled => Ok((false, "Compilation cancelled".to_string())),
        }
    }

    async fn run_stage(
        &self,
        args: &[String],
        cwd: &Path,
        runtime_dir: &Path,
        cancel: &mut watch::Receiver<bool>,
    ) -> sdk::Result<StageOutcome> {
        let child = Command::new(&self.toolchain.command)
            .args(args)
            .current_dir(cwd)
            .env(ENV_SERVER_BUILD, "TRUE")
            .env(ENV_SERVER_RUNTIME, runtime_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        tokio::select! {
            output = child.wait_with_output() => {
                let output = output?;
                let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
                log.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok(StageOutcome::Completed(log))
            }
            // Dropping the wait future force-terminates the subprocess.
            _ = cancelled(cancel) => Ok(StageOutcome::Cancelled)
        }
    }
}

/// Resolves once the cancellation signal fires; pends forever otherwise.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            // Sender gone without signalling: cancellation can never fire.
            std::future::pending::<()>().await;
        }
    }
}

fn existing_file(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}

/// Assemble the in-memory plugin package: the build output (minus runtime
/// loader binaries, debug symbols, and stray asset copies), the project's
/// asset folder under `Assets/`, and the manifest.
fn package_plugin(
    output_dir: &Path,
    assets_dir: &Path,
    manifest_json: &str,
) -> sdk::Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut cursor);
        let options: FileOptions = FileOptions::default();

        for entry in WalkDir::new(output_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(output_dir)
                .map_err(|e| RepoError::PackagingFailure(e.to_string()))?;
            // Assets are packaged from the project directory, not from
            // whatever the build copied into its output.
            let top_level = relative
                .components()
                .next()
                .and_then(|c| c.as_os_str().to_str());
            if matches!(top_level, Some("assets") | Some("Assets")) {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if file_name.starts_with(RUNTIME_LOADER_PREFIX) || file_name.ends_with(".pdb") {
                continue;
            }
            add_file(&mut writer, entry.path(), &zip_name(relative), options)?;
        }

        writer
            .add_directory("Assets/", options)
            .map_err(|e| RepoError::PackagingFailure(e.to_string()))?;
        if assets_dir.is_dir() {
            for entry in WalkDir::new(assets_dir)
                .into_iter()
                .filter_map(|entry| entry.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(assets_dir)
                    .map_err(|e| RepoError::PackagingFailure(e.to_string()))?;
                add_file(
                    &mut writer,
                    entry.path(),
                    &format!("Assets/{}", zip_name(relative)),
                    options,
                )?;
            }
        }

        writer
            .start_file("manifest.json", options)
            .map_err(|e| RepoError::PackagingFailure(e.to_string()))?;
        writer.write_all(manifest_json.as_bytes())?;
        writer
            .finish()
            .map_err(|e| RepoError::PackagingFailure(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

fn zip_name(relative: &Path) -> String {
    relative.to_string_lossy().replace('\\', "/")
}

fn add_file(
    writer: &mut ZipWriter<&mut Cursor<Vec<u8>>>,
    source: &Path,
    name: &str,
    options: FileOptions,
) -> sdk::Result<()> {
    writer
        .start_file(name, options)
        .map_err(|e| RepoError::PackagingFailure(e.to_string()))?;
    let mut file = std::fs::File::open(source)?;
    std::io::copy(&mut file, writer)?;
    Ok(())
}
