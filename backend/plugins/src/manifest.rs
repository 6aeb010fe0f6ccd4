/// Plugin manifest: describes a storehub plugin package.
///
/// Parsed from `storehub-plugin.json` in the package root.
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use storehub_core::PluginInfo;

pub const MANIFEST_FILE_NAME: &str = "storehub-plugin.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Doubles as the plugin's app name once it connects to the hub.
    pub identifier: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Entry point the plugin host resolves to something it can start.
    pub main_entry: String,
}

impl PluginManifest {
    /// Validate the manifest for required fields.
    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            bail!("Plugin manifest missing 'identifier'");
        }
        if !self
            .identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            bail!("Plugin identifier '{}' contains invalid characters", self.identifier);
        }
        if self.name.is_empty() {
            bail!("Plugin manifest missing 'name'");
        }
        if self.main_entry.is_empty() {
            bail!("Plugin manifest missing 'mainEntry'");
        }
        Ok(())
    }

    pub fn info(&self, location: &Path) -> PluginInfo {
        PluginInfo {
            identifier: self.identifier.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            location: location.to_path_buf(),
        }
    }
}

/// Read and validate the manifest of the package at `package_dir`.
pub fn read_manifest(package_dir: &Path) -> Result<PluginManifest> {
    let manifest_path = package_dir.join(MANIFEST_FILE_NAME);
    let raw = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("read manifest at {manifest_path:?}"))?;
    let manifest: PluginManifest =
        serde_json::from_str(&raw).context("parse plugin manifest")?;
    manifest.validate()?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(identifier: &str) -> PluginManifest {
        PluginManifest {
            identifier: identifier.into(),
            name: "Test plugin".into(),
            version: "0.1.0".into(),
            description: None,
            main_entry: "builtin:echo".into(),
        }
    }

    #[test]
    fn test_validate() {
        assert!(manifest("io.example.test-plugin").validate().is_ok());
        assert!(manifest("").validate().is_err());
        assert!(manifest("../escape").validate().is_err());
        assert!(manifest("has space").validate().is_err());

        let mut no_entry = manifest("io.example.test-plugin");
        no_entry.main_entry.clear();
        assert!(no_entry.validate().is_err());
    }

    #[test]
    fn test_read_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE_NAME),
            json!({
                "identifier": "io.example.test-plugin",
                "name": "Test plugin",
                "version": "0.1.0",
                "mainEntry": "builtin:echo",
            })
            .to_string(),
        )
        .unwrap();

        let parsed = read_manifest(dir.path()).unwrap();
        assert_eq!(parsed, manifest("io.example.test-plugin"));
        assert_eq!(parsed.info(dir.path()).location, dir.path());
    }

    #[test]
    fn test_read_manifest_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_manifest(dir.path()).unwrap_err();
        assert!(err.to_string().contains("read manifest"));
    }
}
