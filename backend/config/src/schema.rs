//! Typed hub configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resolved runtime configuration of one hub process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubConfig {
    /// `None` runs the hub on an in-memory database.
    pub db_path: Option<PathBuf>,
    /// Managed directory plugins are installed into and discovered from.
    pub plugins_dir: Option<PathBuf>,
    /// Extra directories scanned for installable plugins.
    pub plugin_search_paths: Vec<PathBuf>,
    /// Where plugin hosts keep plugin credentials. `None` keeps them in memory.
    pub credentials_dir: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub port: u16,
}

/// On-disk TOML form. Every field is optional and overrides the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    /// A path, or `":memory:"` for an in-memory database.
    pub db_path: Option<String>,
    pub plugins_dir: Option<PathBuf>,
    #[serde(default)]
    pub plugin_search_paths: Vec<PathBuf>,
    pub credentials_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub port: Option<u16>,
}

/// Sentinel that selects in-memory storage wherever a database path is accepted.
pub const IN_MEMORY_DB: &str = ":memory:";

pub(crate) fn parse_db_path(raw: &str) -> Option<PathBuf> {
    if raw.is_empty() || raw == IN_MEMORY_DB {
        None
    } else {
        Some(PathBuf::from(raw))
    }
}

impl HubConfig {
    /// Fold a parsed config file over `self`.
    pub fn merge_file(mut self, file: FileConfig) -> Self {
        if let Some(db_path) = file.db_path {
            self.db_path = parse_db_path(&db_path);
        }
        if let Some(plugins_dir) = file.plugins_dir {
            self.plugins_dir = Some(plugins_dir);
        }
        self.plugin_search_paths.extend(file.plugin_search_paths);
        if let Some(credentials_dir) = file.credentials_dir {
            self.credentials_dir = Some(credentials_dir);
        }
        if let Some(log_dir) = file.log_dir {
            self.log_dir = log_dir;
        }
        if let Some(log_level) = file.log_level {
            self.log_level = log_level;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        self
    }

    /// Every directory plugins are discovered from, managed directory first.
    pub fn plugin_roots(&self) -> Vec<PathBuf> {
        self.plugins_dir
            .iter()
            .chain(self.plugin_search_paths.iter())
            .cloned()
            .collect()
    }
}
