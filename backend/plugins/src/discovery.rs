/// Plugin discovery: finds installable plugin packages on disk.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::manifest::{PluginManifest, read_manifest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPlugin {
    pub manifest: PluginManifest,
    pub location: PathBuf,
}

impl DiscoveredPlugin {
    pub fn identifier(&self) -> &str {
        &self.manifest.identifier
    }
}

pub trait PluginDiscovery: Send + Sync {
    /// Every valid package currently visible. Broken packages are skipped.
    fn discover(&self) -> Result<Vec<DiscoveredPlugin>>;

    /// Load the package at an explicit location.
    fn read_package(&self, location: &Path) -> Result<DiscoveredPlugin> {
        let manifest = read_manifest(location)?;
        Ok(DiscoveredPlugin {
            manifest,
            location: location.to_path_buf(),
        })
    }
}

/// Scans each root for immediate subdirectories holding a manifest.
///
/// Roots are scanned in order; when two packages share an identifier the
/// first one wins.
pub struct ManifestDiscovery {
    roots: Vec<PathBuf>,
}

impl ManifestDiscovery {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    fn scan_root(&self, root: &Path, seen: &mut HashSet<String>, out: &mut Vec<DiscoveredPlugin>) -> Result<()> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(root)
            .with_context(|| format!("read plugins dir {root:?}"))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        entries.sort();

        for package in entries {
            match self.read_package(&package) {
                Ok(found) => {
                    if seen.insert(found.manifest.identifier.clone()) {
                        debug!(plugin = %found.identifier(), location = ?package, "Discovered plugin");
                        out.push(found);
                    } else {
                        debug!(plugin = %found.identifier(), location = ?package, "Shadowed duplicate plugin");
                    }
                }
                Err(e) => warn!(location = ?package, error = %e, "Skipping invalid plugin package"),
            }
        }
        Ok(())
    }
}

impl PluginDiscovery for ManifestDiscovery {
    fn discover(&self) -> Result<Vec<DiscoveredPlugin>> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for root in &self.roots {
            if !root.exists() {
                continue;
            }
            self.scan_root(root, &mut seen, &mut found)?;
        }
        Ok(found)
    }
}
