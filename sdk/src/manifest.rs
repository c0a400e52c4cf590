//! Plugin manifest contract
//!
//! The manifest identifies a plugin's identity, authorship, versioning, and
//! build target. Its JSON field names are a stable wire contract shared with
//! plugin authors and the client; changing them breaks every published
//! bundle and every source tree at once.

use serde::{Deserialize, Serialize};

/// Descriptor for one plugin, as found in a source project's
/// `manifest.json` and re-published alongside every artifact bundle.
///
/// Manifests are immutable values: a rebuild produces a fresh instance via
/// [`PluginManifest::copy_with_runtime`] rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Stable plugin identity; unique within the catalog
    pub uuid: String,

    /// Display name
    #[serde(rename = "plugin_name")]
    pub name: String,

    /// Author identifier
    #[serde(rename = "plugin_author")]
    pub author: String,

    /// Short description shown in the repository listing
    #[serde(rename = "plugin_description")]
    pub description: String,

    /// Plugin version string; a change here triggers a rebuild
    #[serde(rename = "plugin_version")]
    pub version: String,

    /// Game version the plugin targets
    pub game_version: String,

    /// Build runtime the plugin was last compiled against
    pub runtime_version: i32,

    /// File name of the assembly the build must produce
    pub target_assembly: String,

    /// Optional link to the plugin's own repository
    #[serde(rename = "repository_url", skip_serializing_if = "Option::is_none")]
    pub repository_link: Option<String>,

    /// Listing categories
    #[serde(default)]
    pub categories: Vec<String>,

    /// Game version ranges the plugin supports
    #[serde(default)]
    pub supported_game_version_ranges: Vec<String>,
}

impl PluginManifest {
    /// Produce the manifest recorded for a rebuild: identical except for the
    /// runtime version actually used by the compile.
    pub fn copy_with_runtime(&self, runtime_version: i32) -> Self {
        Self {
            runtime_version,
            ..self.clone()
        }
    }

    /// Parse a manifest from JSON text
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the manifest to JSON text
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "uuid": "aabbcc",
            "plugin_name": "Minimap",
            "plugin_author": "dev1",
            "plugin_description": "A minimap",
            "plugin_version": "1.2.0",
            "game_version": "1.21.0",
            "runtime_version": 4,
            "target_assembly": "Minimap.dll",
            "repository_url": "https://example.com/minimap",
            "categories": ["ui"],
            "supported_game_version_ranges": ["1.20-1.21"]
        }"#
    }

    #[test]
    fn test_manifest_round_trip() {
        let manifest = PluginManifest::from_json(sample_json()).unwrap();
        assert_eq!(manifest.uuid, "aabbcc");
        assert_eq!(manifest.name, "Minimap");
        assert_eq!(manifest.runtime_version, 4);

        let json = manifest.to_json().unwrap();
        let reparsed = PluginManifest::from_json(&json).unwrap();
        assert_eq!(manifest, reparsed);
    }

    #[test]
    fn test_optional_fields_default() {
        let json = r#"{
            "uuid": "x",
            "plugin_name": "n",
            "plugin_author": "a",
            "plugin_description": "d",
            "plugin_version": "1.0.0",
            "game_version": "1.0",
            "runtime_version": 1,
            "target_assembly": "n.dll"
        }"#;
        let manifest = PluginManifest::from_json(json).unwrap();
        assert!(manifest.repository_link.is_none());
        assert!(manifest.categories.is_empty());
        assert!(manifest.supported_game_version_ranges.is_empty());
    }

    #[test]
    fn test_copy_with_runtime_only_changes_runtime() {
        let manifest = PluginManifest::from_json(sample_json()).unwrap();
        let copy = manifest.copy_with_runtime(9);
        assert_eq!(copy.runtime_version, 9);
        assert_eq!(copy.version, manifest.version);
        assert_eq!(copy.uuid, manifest.uuid);
    }

    #[test]
    fn test_wire_field_names_are_stable() {
        let manifest = PluginManifest::from_json(sample_json()).unwrap();
        let json = manifest.to_json().unwrap();
        for field in [
            "\"uuid\"",
            "\"plugin_name\"",
            "\"plugin_author\"",
            "\"plugin_description\"",
            "\"plugin_version\"",
            "\"game_version\"",
            "\"runtime_version\"",
            "\"target_assembly\"",
            "\"repository_url\"",
            "\"categories\"",
            "\"supported_game_version_ranges\"",
        ] {
            assert!(json.contains(field), "missing wire field {field}");
        }
    }
}
