/// Plugin installer: brings a package under the managed plugins directory.
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::discovery::DiscoveredPlugin;

pub struct PluginInstaller {
    plugins_dir: Option<PathBuf>,
}

impl PluginInstaller {
    /// Without a managed directory every package is used in place.
    pub fn new(plugins_dir: Option<PathBuf>) -> Self {
        Self { plugins_dir }
    }

    pub fn plugins_dir(&self) -> Option<&Path> {
        self.plugins_dir.as_deref()
    }

    /// Install `package`, returning the location the plugin runs from.
    pub fn install(&self, package: &DiscoveredPlugin) -> Result<PathBuf> {
        let source = &package.location;
        if !source.is_dir() {
            bail!("Source is not a directory: {:?}", source);
        }
        let Some(plugins_dir) = &self.plugins_dir else {
            return Ok(source.clone());
        };
        if source.starts_with(plugins_dir) {
            return Ok(source.clone());
        }

        let dest = plugins_dir.join(package.identifier());
        if dest.exists() {
            std::fs::remove_dir_all(&dest)
                .with_context(|| format!("remove stale plugin dir {:?}", dest))?;
        }
        std::fs::create_dir_all(plugins_dir)?;
        copy_dir(source, &dest).context("copy plugin dir")?;
        info!(plugin = %package.identifier(), dest = ?dest, "Installed plugin package");
        Ok(dest)
    }
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dst_path = dst.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &dst_path)?;
        } else {
            std::fs::copy(entry.path(), dst_path)?;
        }
    }
    Ok(())
}
