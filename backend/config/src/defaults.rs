//! Default values used before the config file and environment are applied.

use std::path::PathBuf;

use crate::schema::HubConfig;

pub const DEFAULT_PORT: u16 = 50483;

/// Production hubs listen on a different port so a development hub can run beside one.
pub const PRODUCTION_PORT: u16 = 50482;

pub const DEFAULT_LOG_LEVEL: &str = "info";

const DB_FILE_NAME: &str = "hub.sqlite3";

/// Root of the hub's persistent data.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storehub")
}

/// Defaults rooted at `data_dir`.
pub fn default_config(data_dir: PathBuf, production: bool) -> HubConfig {
    HubConfig {
        db_path: Some(data_dir.join(DB_FILE_NAME)),
        plugins_dir: Some(data_dir.join("plugins")),
        plugin_search_paths: Vec::new(),
        credentials_dir: Some(data_dir.join("credentials")),
        log_dir: data_dir.join("logs"),
        log_level: DEFAULT_LOG_LEVEL.to_string(),
        port: if production { PRODUCTION_PORT } else { DEFAULT_PORT },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = default_config(PathBuf::from("/var/lib/storehub"), false);
        assert_eq!(config.db_path, Some(PathBuf::from("/var/lib/storehub/hub.sqlite3")));
        assert_eq!(config.plugins_dir, Some(PathBuf::from("/var/lib/storehub/plugins")));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(default_config(PathBuf::from("/x"), true).port, PRODUCTION_PORT);
    }
}
