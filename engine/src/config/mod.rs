//! Configuration management
//!
//! This module handles loading and validation of the Depot configuration.
//! Configuration is stored in TOML format, `depot.toml` next to the binary
//! by default.
//!
//! # Configuration Sections
//!
//! - **core**: data directory, log level
//! - **toolchain**: external build toolchain command and layout
//! - **vcs**: plugin monorepo remote
//! - **pipeline**: update cycle cadence and unpublish retry policy
//! - **runtimes**: change-notification settle delay
//! - **downloads**: counter flush cadence
//! - **published**: read-model reload cadence
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working local configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name, resolved against the working directory
pub const DEFAULT_CONFIG_FILE: &str = "depot.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core service settings
    #[serde(default)]
    pub core: CoreConfig,

    /// External build toolchain settings
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    /// Plugin monorepo settings
    #[serde(default)]
    pub vcs: VcsConfig,

    /// Update pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Runtime registry settings
    #[serde(default)]
    pub runtimes: RuntimesConfig,

    /// Download counter settings
    #[serde(default)]
    pub downloads: DownloadsConfig,

    /// Published catalog settings
    #[serde(default)]
    pub published: PublishedConfig,
}

/// Core service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory holding sources, bundles, runtimes, and allowlists
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// External build toolchain configuration.
///
/// The toolchain is an external collaborator: Depot only agrees with it on
/// the invocation (command + clean/build arguments), the environment
/// variables marking a server build, and the success sentinel file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Toolchain executable
    #[serde(default = "default_toolchain_command")]
    pub command: String,

    /// Arguments for the pre-build clean invocation
    #[serde(default = "default_clean_args")]
    pub clean_args: Vec<String>,

    /// Arguments for the build invocation
    #[serde(default = "default_build_args")]
    pub build_args: Vec<String>,

    /// Build output directory, relative to a plugin's project directory
    #[serde(default = "default_build_output_dir")]
    pub build_output_dir: PathBuf,
}

/// Plugin monorepo configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VcsConfig {
    /// Remote to clone the source monorepo from when no checkout exists.
    /// When unset, whatever is on disk is used as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

/// Update pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Seconds between automatic update cycles
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,

    /// How many times a failed artifact-bundle deletion is retried
    #[serde(default = "default_unpublish_retries")]
    pub unpublish_retries: u32,

    /// Delay between unpublish retries, in milliseconds
    #[serde(default = "default_unpublish_retry_delay_ms")]
    pub unpublish_retry_delay_ms: u64,
}

/// Runtime registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimesConfig {
    /// How long a newly created runtime directory is given to settle before
    /// being marked available, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

/// Download counter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadsConfig {
    /// Seconds between dirty-flag flushes of the counter store
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

/// Published catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedConfig {
    /// Seconds between full reloads of the published read model
    #[serde(default = "default_reload_interval_secs")]
    pub reload_interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_toolchain_command() -> String {
    "dotnet".to_string()
}

fn default_clean_args() -> Vec<String> {
    vec!["clean".to_string()]
}

fn default_build_args() -> Vec<String> {
    vec!["build".to_string(), "-c".to_string(), "Release".to_string()]
}

fn default_build_output_dir() -> PathBuf {
    PathBuf::from("bin/x64/Release/net8.0")
}

fn default_cycle_interval_secs() -> u64 {
    3600
}

fn default_unpublish_retries() -> u32 {
    25
}

fn default_unpublish_retry_delay_ms() -> u64 {
    500
}

fn default_settle_delay_ms() -> u64 {
    7500
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_reload_interval_secs() -> u64 {
    3600
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            command: default_toolchain_command(),
            clean_args: default_clean_args(),
            build_args: default_build_args(),
            build_output_dir: default_build_output_dir(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval_secs(),
            unpublish_retries: default_unpublish_retries(),
            unpublish_retry_delay_ms: default_unpublish_retry_delay_ms(),
        }
    }
}

impl Default for RuntimesConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl Default for PublishedConfig {
    fn default() -> Self {
        Self {
            reload_interval_secs: default_reload_interval_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default location, writing a default file
    /// if none exists yet.
    pub fn load_or_create() -> anyhow::Result<Self> {
        let path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if path.exists() {
            return Self::load_from_path(&path);
        }
        let config = Config::default();
        fs::write(&path, toml::to_string_pretty(&config)?)?;
        Ok(config)
    }

    /// Interval between automatic update cycles
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.pipeline.cycle_interval_secs)
    }

    /// Settle delay for runtime change notifications
    pub fn runtime_settle_delay(&self) -> Duration {
        Duration::from_millis(self.runtimes.settle_delay_ms)
    }

    /// Delay between unpublish retries
    pub fn unpublish_retry_delay(&self) -> Duration {
        Duration::from_millis(self.pipeline.unpublish_retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.core.data_dir, PathBuf::from("data"));
        assert_eq!(config.toolchain.command, "dotnet");
        assert_eq!(config.pipeline.unpublish_retries, 25);
        assert_eq!(config.pipeline.unpublish_retry_delay_ms, 500);
        assert_eq!(config.runtimes.settle_delay_ms, 7500);
        assert!(config.vcs.remote.is_none());
    }

    #[test]
    fn test_partial_override() {
        let config: Config = toml::from_str(
            r#"
            [core]
            data_dir = "/srv/depot"
            log_level = "debug"

            [toolchain]
            command = "/usr/local/bin/dotnet"

            [vcs]
            remote = "https://example.com/plugins.git"
            "#,
        )
        .unwrap();
        assert_eq!(config.core.data_dir, PathBuf::from("/srv/depot"));
        assert_eq!(config.core.log_level, "debug");
        assert_eq!(config.toolchain.command, "/usr/local/bin/dotnet");
        assert_eq!(config.toolchain.build_args, vec!["build", "-c", "Release"]);
        assert_eq!(
            config.vcs.remote.as_deref(),
            Some("https://example.com/plugins.git")
        );
    }

    #[test]
    fn test_round_trip() {
        let config = Config::default();
        let toml_text = toml::to_string_pretty(&config).unwrap();
        let reparsed: Config = toml::from_str(&toml_text).unwrap();
        assert_eq!(
            reparsed.pipeline.cycle_interval_secs,
            config.pipeline.cycle_interval_secs
        );
    }
}
