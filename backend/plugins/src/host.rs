//! Plugin host: the execution side of a plugin.
//!
//! The hub never runs plugin code itself. A [`PluginHost`] turns a manifest
//! into a running [`PluginInstance`] exposing a callback surface, stops it
//! again, and keeps the plugin's own hub credential.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storehub_core::AppCallbacks;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::manifest::PluginManifest;

/// Result of asking a running plugin to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopOutcome {
    Stopped,
    /// The plugin cannot be fully unloaded until the hub process restarts.
    NeedsRestart,
}

#[async_trait]
pub trait PluginInstance: Send + Sync {
    fn callbacks(&self) -> Arc<dyn AppCallbacks>;

    async fn shutdown(&self) -> Result<StopOutcome>;
}

#[async_trait]
pub trait PluginHost: Send + Sync {
    async fn start(
        &self,
        manifest: &PluginManifest,
        location: &Path,
    ) -> Result<Arc<dyn PluginInstance>>;

    async fn stop(&self, instance: Arc<dyn PluginInstance>) -> Result<StopOutcome> {
        instance.shutdown().await
    }

    async fn load_access_token(&self, identifier: &str) -> Result<Option<String>>;

    async fn store_access_token(&self, identifier: &str, token: &str) -> Result<()>;
}

/// Builds an instance for one `mainEntry`.
pub trait PluginFactory: Send + Sync {
    fn create(&self, manifest: &PluginManifest, location: &Path) -> Result<Arc<dyn PluginInstance>>;
}

impl<F> PluginFactory for F
where
    F: Fn(&PluginManifest, &Path) -> Result<Arc<dyn PluginInstance>> + Send + Sync,
{
    fn create(&self, manifest: &PluginManifest, location: &Path) -> Result<Arc<dyn PluginInstance>> {
        self(manifest, location)
    }
}

/// Runs plugins compiled into the hub, looked up by `mainEntry`.
pub struct BuiltinPluginHost {
    factories: HashMap<String, Arc<dyn PluginFactory>>,
    credentials_dir: Option<PathBuf>,
    tokens: Mutex<HashMap<String, String>>,
}

impl BuiltinPluginHost {
    pub fn new(credentials_dir: Option<PathBuf>) -> Self {
        Self {
            factories: HashMap::new(),
            credentials_dir,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&mut self, main_entry: impl Into<String>, factory: impl PluginFactory + 'static) {
        self.factories.insert(main_entry.into(), Arc::new(factory));
    }

    pub fn with_factory(mut self, main_entry: impl Into<String>, factory: impl PluginFactory + 'static) -> Self {
        self.register(main_entry, factory);
        self
    }

    fn token_path(&self, identifier: &str) -> Option<PathBuf> {
        self.credentials_dir
            .as_ref()
            .map(|dir| dir.join(format!("{identifier}.token")))
    }
}

#[async_trait]
impl PluginHost for BuiltinPluginHost {
    async fn start(
        &self,
        manifest: &PluginManifest,
        location: &Path,
    ) -> Result<Arc<dyn PluginInstance>> {
        let Some(factory) = self.factories.get(&manifest.main_entry) else {
            bail!(
                "No builtin plugin registered for entry '{}' of '{}'",
                manifest.main_entry,
                manifest.identifier
            );
        };
        let instance = factory.create(manifest, location)?;
        info!(plugin = %manifest.identifier, version = %manifest.version, "Plugin started");
        Ok(instance)
    }

    async fn load_access_token(&self, identifier: &str) -> Result<Option<String>> {
        if let Some(token) = self.tokens.lock().await.get(identifier) {
            return Ok(Some(token.clone()));
        }
        let Some(path) = self.token_path(identifier) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let token = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("read plugin credential {path:?}"))?;
        let token = token.trim().to_string();
        self.tokens
            .lock()
            .await
            .insert(identifier.to_string(), token.clone());
        debug!(plugin = %identifier, "Loaded plugin credential from disk");
        Ok(Some(token))
    }

    async fn store_access_token(&self, identifier: &str, token: &str) -> Result<()> {
        self.tokens
            .lock()
            .await
            .insert(identifier.to_string(), token.to_string());
        let Some(path) = self.token_path(identifier) else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        if let Err(e) = tokio::fs::write(&path, token).await {
            warn!(plugin = %identifier, error = %e, "Could not persist plugin credential");
            return Err(e).with_context(|| format!("write plugin credential {path:?}"));
        }
        Ok(())
    }
}
