use std::sync::{Arc, OnceLock, Weak};

use storehub_core::{CallbackExecutor, PluginManagement, Storage};
use storehub_events::EventBus;
use storehub_security::AccessTokenManager;

/// Collaborators shared by every session of one hub.
pub struct SessionContext {
    pub access_tokens: Arc<dyn AccessTokenManager>,
    pub storage: Arc<dyn Storage>,
    pub events: Arc<EventBus>,
    pub executor: Arc<dyn CallbackExecutor>,
    // The plugin manager itself opens sessions, so it is attached after construction.
    plugins: OnceLock<Weak<dyn PluginManagement>>,
}

impl SessionContext {
    pub fn new(
        access_tokens: Arc<dyn AccessTokenManager>,
        storage: Arc<dyn Storage>,
        events: Arc<EventBus>,
        executor: Arc<dyn CallbackExecutor>,
    ) -> Self {
        Self {
            access_tokens,
            storage,
            events,
            executor,
            plugins: OnceLock::new(),
        }
    }

    /// Attach plugin management. Only the first call has an effect.
    pub fn attach_plugins(&self, plugins: Weak<dyn PluginManagement>) {
        let _ = self.plugins.set(plugins);
    }

    pub fn plugins(&self) -> Option<Arc<dyn PluginManagement>> {
        self.plugins.get().and_then(Weak::upgrade)
    }
}
