use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    /// The database could not be opened. The hub cannot run without it.
    #[error("failed to open storage at {path:?}: {error:#}")]
    Storage { path: PathBuf, error: anyhow::Error },

    #[error("failed to open in-memory storage: {0:#}")]
    InMemoryStorage(anyhow::Error),
}
