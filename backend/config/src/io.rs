//! Config file loading.

use std::path::Path;

use tokio::fs;
use tracing::{debug, info};

use crate::schema::FileConfig;
use crate::validation::ConfigError;

/// Load and parse a TOML config file.
///
/// Returns `Ok(FileConfig::default())` if the file doesn't exist (first run).
pub async fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(FileConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let config: FileConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}
