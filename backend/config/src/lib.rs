//! `storehub-config`: hub runtime configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file, then
//! environment overrides. The result is validated before it is returned.

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::{data_dir, default_config, DEFAULT_PORT, PRODUCTION_PORT};
pub use env::{apply_env_overrides, is_production, process_env};
pub use io::load_file;
pub use schema::{FileConfig, HubConfig, IN_MEMORY_DB};
pub use validation::{validate, ConfigError};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

impl HubConfig {
    /// Resolve the configuration from the process environment.
    pub async fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(config_path, &process_env(), data_dir()).await
    }

    /// Resolve the configuration against an explicit environment and data directory.
    ///
    /// `config_path` wins over `STOREHUB_CONFIG`.
    pub async fn load_with(
        config_path: Option<&Path>,
        env: &HashMap<String, String>,
        data_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        let mut config = default_config(data_dir, is_production(env));

        let file_path = config_path
            .map(Path::to_path_buf)
            .or_else(|| env.get(env::ENV_CONFIG).map(PathBuf::from));
        if let Some(path) = file_path {
            config = config.merge_file(load_file(&path).await?);
        }

        let config = apply_env_overrides(config, env)?;
        validate(&config)?;
        tracing::debug!(config = ?config, "Resolved hub config");
        Ok(config)
    }
}
