//! Plugins that ship with the hub.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use storehub_core::{AppCallbacks, EventDelivery, RemoteOperationRequest, RemoteOperationResponse};
use tracing::debug;

use crate::host::{BuiltinPluginHost, PluginInstance, StopOutcome};
use crate::manifest::PluginManifest;

pub const ECHO_ENTRY: &str = "builtin:echo";

/// Answers every remote operation with what it was sent.
#[derive(Default)]
pub struct EchoPlugin {
    callbacks: Arc<EchoCallbacks>,
}

#[derive(Default)]
struct EchoCallbacks;

#[async_trait]
impl AppCallbacks for EchoCallbacks {
    async fn handle_remote_operation(
        &self,
        request: RemoteOperationRequest,
    ) -> Result<RemoteOperationResponse> {
        Ok(RemoteOperationResponse {
            result: json!({
                "sourceApp": request.source_app,
                "operation": request.operation,
            }),
        })
    }

    async fn handle_event(&self, delivery: EventDelivery) -> Result<()> {
        debug!(subscription = %delivery.subscription_id, event_type = %delivery.event.event_type, "Echo plugin received event");
        Ok(())
    }
}

#[async_trait]
impl PluginInstance for EchoPlugin {
    fn callbacks(&self) -> Arc<dyn AppCallbacks> {
        self.callbacks.clone()
    }

    async fn shutdown(&self) -> Result<StopOutcome> {
        Ok(StopOutcome::Stopped)
    }
}

pub fn echo_factory(_manifest: &PluginManifest, _location: &Path) -> Result<Arc<dyn PluginInstance>> {
    Ok(Arc::new(EchoPlugin::default()))
}

impl BuiltinPluginHost {
    /// A host with every bundled plugin registered.
    pub fn with_builtins(credentials_dir: Option<std::path::PathBuf>) -> Self {
        BuiltinPluginHost::new(credentials_dir).with_factory(ECHO_ENTRY, echo_factory)
    }
}
