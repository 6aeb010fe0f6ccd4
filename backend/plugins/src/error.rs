use storehub_core::{PluginStatus, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{0}' not found")]
    NotFound(String),

    #[error("invalid plugin package: {0}")]
    InvalidPackage(String),

    #[error("plugin '{identifier}' is {status}, cannot {action}")]
    InvalidState {
        identifier: String,
        status: PluginStatus,
        action: &'static str,
    },

    /// The transition ran but left the plugin in a failure state.
    #[error("plugin '{identifier}' could not {action}, it is now {status}")]
    TransitionFailed {
        identifier: String,
        status: PluginStatus,
        action: &'static str,
    },

    #[error("plugin '{0}' is waiting for a hub restart to finish unloading")]
    RestartRequired(String),

    #[error("plugin storage failed: {0:#}")]
    Storage(anyhow::Error),

    #[error("plugin discovery failed: {0:#}")]
    Discovery(anyhow::Error),
}

impl From<PluginError> for ProtocolError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::NotFound(_) => ProtocolError::NotFound,
            PluginError::Storage(e) => ProtocolError::storage(e),
            other => ProtocolError::PluginError {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_mapping() {
        assert_eq!(
            ProtocolError::from(PluginError::NotFound("x".into())),
            ProtocolError::NotFound
        );
        let mapped = ProtocolError::from(PluginError::InvalidState {
            identifier: "x".into(),
            status: PluginStatus::Installing,
            action: "enable",
        });
        assert_eq!(
            mapped,
            ProtocolError::PluginError {
                message: "plugin 'x' is installing, cannot enable".into()
            }
        );
        let mapped = ProtocolError::from(PluginError::TransitionFailed {
            identifier: "x".into(),
            status: PluginStatus::InstalledButErrored,
            action: "install",
        });
        assert_eq!(mapped.status(), "plugin-error");
        assert_eq!(
            mapped.to_string(),
            "plugin error: plugin 'x' could not install, it is now installed-but-errored"
        );
    }
}
