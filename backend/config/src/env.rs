//! Environment variable overrides.
//!
//! Applied last, so they win over both the defaults and the config file.
//! Every function takes the environment as a map so tests never touch the
//! process environment.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::schema::{parse_db_path, HubConfig};
use crate::validation::ConfigError;

pub const ENV_CONFIG: &str = "STOREHUB_CONFIG";
pub const ENV_MODE: &str = "STOREHUB_ENV";
pub const ENV_DB_PATH: &str = "STOREHUB_DB_PATH";
pub const ENV_PLUGINS_DIR: &str = "STOREHUB_PLUGINS_DIR";
pub const ENV_PLUGIN_PATH: &str = "STOREHUB_PLUGIN_PATH";
pub const ENV_CREDENTIALS_DIR: &str = "STOREHUB_CREDENTIALS_DIR";
pub const ENV_LOG_DIR: &str = "STOREHUB_LOG_DIR";
pub const ENV_PORT: &str = "STOREHUB_PORT";
pub const ENV_RUST_LOG: &str = "RUST_LOG";

// Short names accepted for compatibility with older launch scripts.
const ENV_DB_PATH_ALIAS: &str = "DB_PATH";
const ENV_PLUGINS_DIR_ALIAS: &str = "PLUGINS_DIR";

/// Snapshot of the process environment.
pub fn process_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Whether the environment selects production mode.
pub fn is_production(env: &HashMap<String, String>) -> bool {
    env.get(ENV_MODE).is_some_and(|mode| mode == "production")
}

fn lookup<'a>(env: &'a HashMap<String, String>, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| env.get(*name))
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// Apply every recognised override in `env` to `config`.
pub fn apply_env_overrides(
    mut config: HubConfig,
    env: &HashMap<String, String>,
) -> Result<HubConfig, ConfigError> {
    if let Some(db_path) = lookup(env, &[ENV_DB_PATH, ENV_DB_PATH_ALIAS]) {
        config.db_path = parse_db_path(db_path);
    }
    if let Some(dir) = lookup(env, &[ENV_PLUGINS_DIR, ENV_PLUGINS_DIR_ALIAS]) {
        config.plugins_dir = Some(PathBuf::from(dir));
    }
    if let Some(paths) = lookup(env, &[ENV_PLUGIN_PATH]) {
        config.plugin_search_paths.extend(std::env::split_paths(paths));
    }
    if let Some(dir) = lookup(env, &[ENV_CREDENTIALS_DIR]) {
        config.credentials_dir = Some(PathBuf::from(dir));
    }
    if let Some(dir) = lookup(env, &[ENV_LOG_DIR]) {
        config.log_dir = PathBuf::from(dir);
    }
    if let Some(level) = lookup(env, &[ENV_RUST_LOG]) {
        config.log_level = level.to_string();
    }
    if let Some(port) = lookup(env, &[ENV_PORT]) {
        config.port = port.parse().map_err(|e: std::num::ParseIntError| ConfigError::InvalidEnv {
            var: ENV_PORT.to_string(),
            value: port.to_string(),
            reason: e.to_string(),
        })?;
    }
    Ok(config)
}
