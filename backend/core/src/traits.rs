use anyhow::Result;
use async_trait::async_trait;

use crate::error::ProtocolError;
use crate::event::EventDelivery;
use crate::protocol::{
    InspectPluginResult, InstallPluginOptions, ListPluginsResult, RemoteOperationRequest,
    RemoteOperationResponse,
};
use crate::types::{App, AppSchema, NewApp, PluginRecord};

/// Persistent storage the hub runs on.
///
/// Reads and writes are plain request/response; the hub adds no locking on top.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_app(&self, identifier: &str) -> Result<Option<App>>;

    async fn create_app(&self, app: NewApp) -> Result<App>;

    /// Merge `schema` into the app's stored schema and return the merged result.
    async fn update_app_schema(&self, identifier: &str, schema: &AppSchema) -> Result<AppSchema>;

    async fn list_apps(&self) -> Result<Vec<App>>;

    /// Remove an app record. Returns whether one existed.
    async fn delete_app(&self, identifier: &str) -> Result<bool>;

    async fn get_plugin(&self, identifier: &str) -> Result<Option<PluginRecord>>;

    async fn list_plugins(&self) -> Result<Vec<PluginRecord>>;

    /// Insert or replace a plugin record.
    async fn put_plugin(&self, record: &PluginRecord) -> Result<()>;

    /// Run a named storage operation with positional arguments.
    async fn run_operation(
        &self,
        name: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value>;

    /// Register the namespace's collections. The storage model is refreshed before this returns.
    async fn apply_schema(&self, namespace: &str, schema: &AppSchema) -> Result<()>;
}

/// The callback surface an app exposes to the hub.
#[async_trait]
pub trait AppCallbacks: Send + Sync {
    async fn handle_remote_operation(
        &self,
        request: RemoteOperationRequest,
    ) -> Result<RemoteOperationResponse>;

    async fn handle_event(&self, _delivery: EventDelivery) -> Result<()> {
        Ok(())
    }
}

/// Result of asking the hub to invoke another app's callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome<T> {
    Success(T),
    /// The target is not identified, not connected, or stopped answering.
    AppNotFound,
}

/// Routes callbacks to identified apps, whether they are plugins or external clients.
#[async_trait]
pub trait CallbackExecutor: Send + Sync {
    async fn handle_remote_operation(
        &self,
        target_app: &str,
        request: RemoteOperationRequest,
    ) -> CallbackOutcome<RemoteOperationResponse>;
}

/// Plugin management calls reachable from a session.
#[async_trait]
pub trait PluginManagement: Send + Sync {
    async fn list_plugins(&self) -> Result<ListPluginsResult, ProtocolError>;

    async fn install_plugin(&self, options: InstallPluginOptions) -> Result<(), ProtocolError>;

    async fn inspect_plugin(&self, identifier: &str) -> Result<InspectPluginResult, ProtocolError>;

    async fn enable_plugin(&self, identifier: &str) -> Result<(), ProtocolError>;

    async fn disable_plugin(&self, identifier: &str) -> Result<(), ProtocolError>;
}
