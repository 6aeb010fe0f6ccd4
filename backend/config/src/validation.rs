//! Config errors and validation.

use std::path::PathBuf;

use thiserror::Error;

use crate::schema::HubConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },

    #[error("Config validation error at '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

/// Reject configurations the hub cannot start with.
pub fn validate(config: &HubConfig) -> Result<(), ConfigError> {
    if config.log_level.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field: "log_level",
            message: "log level cannot be empty".into(),
        });
    }
    if config.port == 0 {
        return Err(ConfigError::Invalid {
            field: "port",
            message: "port must be between 1 and 65535".into(),
        });
    }
    if let (Some(plugins_dir), Some(db_path)) = (&config.plugins_dir, &config.db_path) {
        if db_path.starts_with(plugins_dir) {
            return Err(ConfigError::Invalid {
                field: "db_path",
                message: "database cannot live inside the managed plugins directory".into(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::default_config;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&default_config(PathBuf::from("/data"), false)).is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = default_config(PathBuf::from("/data"), false);
        config.log_level = "  ".into();
        assert!(matches!(validate(&config), Err(ConfigError::Invalid { field: "log_level", .. })));

        let mut config = default_config(PathBuf::from("/data"), false);
        config.port = 0;
        assert!(matches!(validate(&config), Err(ConfigError::Invalid { field: "port", .. })));

        let mut config = default_config(PathBuf::from("/data"), false);
        config.db_path = Some(PathBuf::from("/data/plugins/hub.db"));
        assert!(matches!(validate(&config), Err(ConfigError::Invalid { field: "db_path", .. })));
    }
}
