//! Pipeline value types
//!
//! Values passed between the compiler and the publisher. A
//! `CompilationResult` is produced once per compile invocation, consumed
//! once by the publisher, then discarded.

use crate::manifest::PluginManifest;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome of compiling one plugin source.
///
/// The serialized form (returned to operators for self-diagnosis) carries
/// the success flag, build log, artifact hash, and manifest snapshot; the
/// packaged bytes and transient media paths never leave the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationResult {
    /// Whether the build's success sentinel was present
    pub success: bool,

    /// Combined stdout/stderr of the build, plus any failure annotations
    pub build_log: String,

    /// Lowercase hex SHA-512 of the target assembly; empty on failure
    #[serde(rename = "main_assembly_hash")]
    pub artifact_hash: String,

    /// Manifest snapshot the result was built from
    pub manifest: Option<PluginManifest>,

    /// Packaged plugin zip, held in memory until published
    #[serde(skip)]
    pub zipped_plugin: Vec<u8>,

    /// Icon produced by the compile, if the project ships one
    #[serde(skip)]
    pub icon_path: Option<PathBuf>,

    /// Banner produced by the compile, if the project ships one
    #[serde(skip)]
    pub banner_path: Option<PathBuf>,

    /// The project's asset folder
    #[serde(skip)]
    pub assets_path: Option<PathBuf>,
}

impl CompilationResult {
    /// A failed compile carrying its log for self-diagnosis
    pub fn failed(build_log: impl Into<String>, manifest: Option<PluginManifest>) -> Self {
        Self {
            success: false,
            build_log: build_log.into(),
            artifact_hash: String::new(),
            manifest,
            zipped_plugin: Vec::new(),
            icon_path: None,
            banner_path: None,
            assets_path: None,
        }
    }
}
