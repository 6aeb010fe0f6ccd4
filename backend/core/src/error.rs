use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable codes returned when a schema update is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateSchemaError {
    NotAllowed,
    BadRequest,
    SchemaNotAllowed,
}

/// Typed failure of a protocol call.
///
/// Serialized with a `status` tag so a transport can hand it to clients as-is.
/// Authorization failures deliberately carry no detail: an unknown app name and
/// a wrong token are both `InvalidAccessToken`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(
    tag = "status",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ProtocolError {
    #[error("app already exists")]
    AppAlreadyExists,

    #[error("invalid access token")]
    InvalidAccessToken,

    #[error("session is not identified")]
    NotIdentified,

    #[error("app not found")]
    AppNotFound,

    #[error("not found")]
    NotFound,

    #[error("session destroyed")]
    SessionDestroyed,

    #[error("{error_text}")]
    SchemaRejected {
        error_code: UpdateSchemaError,
        error_text: String,
    },

    #[error("storage error: {message}")]
    StorageError { message: String },

    #[error("plugin error: {message}")]
    PluginError { message: String },

    #[error("internal error: {message}")]
    InternalError { message: String },
}

impl ProtocolError {
    pub fn schema(error_code: UpdateSchemaError, error_text: impl Into<String>) -> Self {
        ProtocolError::SchemaRejected {
            error_code,
            error_text: error_text.into(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        ProtocolError::StorageError {
            message: err.to_string(),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ProtocolError::InternalError {
            message: err.to_string(),
        }
    }

    /// Wire status code, e.g. `invalid-access-token`.
    pub fn status(&self) -> &'static str {
        match self {
            ProtocolError::AppAlreadyExists => "app-already-exists",
            ProtocolError::InvalidAccessToken => "invalid-access-token",
            ProtocolError::NotIdentified => "not-identified",
            ProtocolError::AppNotFound => "app-not-found",
            ProtocolError::NotFound => "not-found",
            ProtocolError::SessionDestroyed => "session-destroyed",
            ProtocolError::SchemaRejected { .. } => "schema-rejected",
            ProtocolError::StorageError { .. } => "storage-error",
            ProtocolError::PluginError { .. } => "plugin-error",
            ProtocolError::InternalError { .. } => "internal-error",
        }
    }
}
