use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use storehub_core::{CallbackExecutor, CallbackOutcome, RemoteOperationRequest, RemoteOperationResponse};
use storehub_logging::redact_sensitive_data;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::listener::{AppIdentified, SessionListener};
use crate::session::{Session, SessionId};

/// Identified sessions by app identifier. The latest identification wins.
#[derive(Default)]
pub struct SessionRegistry {
    identified: RwLock<HashMap<String, Weak<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identifier` to `session`, dropping any earlier binding of that session.
    pub async fn bind(&self, identifier: &str, session: &Session) {
        let mut identified = self.identified.write().await;
        let id = session.id();
        identified.retain(|_, bound| bound.upgrade().is_some_and(|s| s.id() != id));
        if let Some(previous) = identified.insert(identifier.to_string(), session.handle()) {
            if previous.upgrade().is_some() {
                debug!(app = %identifier, "Rebinding app to a newer session");
            }
        }
    }

    /// Remove every binding that points at `session`. Returns how many were removed.
    pub async fn unbind_session(&self, session: SessionId) -> usize {
        let mut identified = self.identified.write().await;
        let before = identified.len();
        identified.retain(|_, bound| bound.upgrade().is_some_and(|s| s.id() != session));
        before - identified.len()
    }

    pub async fn get(&self, identifier: &str) -> Option<Arc<Session>> {
        self.identified
            .read()
            .await
            .get(identifier)
            .and_then(Weak::upgrade)
            .filter(|session| !session.is_destroyed())
    }

    pub async fn identified_apps(&self) -> Vec<String> {
        let mut apps: Vec<String> = self
            .identified
            .read()
            .await
            .iter()
            .filter(|(_, bound)| bound.upgrade().is_some_and(|s| !s.is_destroyed()))
            .map(|(identifier, _)| identifier.clone())
            .collect();
        apps.sort();
        apps
    }
}

#[async_trait]
impl CallbackExecutor for SessionRegistry {
    async fn handle_remote_operation(
        &self,
        target: &str,
        request: RemoteOperationRequest,
    ) -> CallbackOutcome<RemoteOperationResponse> {
        let Some(session) = self.get(target).await else {
            return CallbackOutcome::AppNotFound;
        };
        let Some(callbacks) = session.callbacks() else {
            debug!(target = %target, "Target session has no callback surface");
            return CallbackOutcome::AppNotFound;
        };
        match callbacks.handle_remote_operation(request).await {
            Ok(response) => CallbackOutcome::Success(response),
            Err(e) => {
                warn!(
                    target = %target,
                    error = %redact_sensitive_data(&format!("{e:#}")),
                    "Remote operation handler failed"
                );
                CallbackOutcome::AppNotFound
            }
        }
    }
}

#[async_trait]
impl SessionListener for SessionRegistry {
    async fn on_app_identified(&self, session: &Session, event: &AppIdentified) {
        self.bind(&event.identifier, session).await;
    }

    async fn on_session_destroyed(&self, session: &Session) {
        let removed = self.unbind_session(session.id()).await;
        if removed > 0 {
            debug!(session = %session.id(), "Session unbound from registry");
        }
    }
}
