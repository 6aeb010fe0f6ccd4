use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Raised once a session successfully identifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentified {
    pub identifier: String,
    pub remote: bool,
}

/// Observer registered on a session before it is handed out.
#[async_trait]
pub trait SessionListener: Send + Sync {
    async fn on_app_identified(&self, session: &Session, event: &AppIdentified);

    async fn on_session_destroyed(&self, _session: &Session) {}
}
