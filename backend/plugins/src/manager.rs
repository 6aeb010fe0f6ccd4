//! Plugin manager: drives the install/enable/disable state machine.
//!
//! Every transition for one plugin identifier runs under that identifier's
//! own lock; different plugins transition concurrently. A started plugin is
//! connected to the hub through an ordinary [`Session`], so other apps reach
//! it exactly like an external client.
//!
//! Lifecycle failures (`could-not-install`, `installed-but-errored`,
//! `could-not-disable`, `disable-pending`) are persisted states, not call
//! errors: the transition methods return the status they ended in. Only
//! requests that make no sense for the current state are rejected. The
//! protocol surface reports an install or enable that ended in a failure
//! state as a plugin error.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use anyhow::bail;
use async_trait::async_trait;
use serde::Serialize;
use storehub_core::{
    AppCallbacks, IdentifyAppOptions, InspectPluginResult, InstallPluginOptions,
    ListPluginsResult, PluginInfo, PluginManagement, PluginRecord, PluginState, PluginStatus,
    ProtocolError, RegisterAppOptions, Storage,
};
use storehub_session::Session;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::discovery::{DiscoveredPlugin, PluginDiscovery};
use crate::error::PluginError;
use crate::host::{PluginHost, PluginInstance, StopOutcome};
use crate::installer::PluginInstaller;
use crate::manifest::{PluginManifest, read_manifest};

/// Opens hub sessions on behalf of plugins.
#[async_trait]
pub trait SessionOpener: Send + Sync {
    async fn open_session(&self, callbacks: Option<Arc<dyn AppCallbacks>>) -> Arc<Session>;
}

struct LoadedPlugin {
    running: bool,
    instance: Arc<dyn PluginInstance>,
    session: Arc<Session>,
}

/// Runtime view of a loaded plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadedPluginState {
    pub running: bool,
}

pub struct PluginManager {
    storage: Arc<dyn Storage>,
    discovery: Arc<dyn PluginDiscovery>,
    installer: PluginInstaller,
    host: Arc<dyn PluginHost>,
    sessions: Arc<dyn SessionOpener>,
    transitions: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    loaded: RwLock<HashMap<String, LoadedPlugin>>,
    discovered: RwLock<BTreeMap<String, DiscoveredPlugin>>,
}

impl PluginManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        discovery: Arc<dyn PluginDiscovery>,
        installer: PluginInstaller,
        host: Arc<dyn PluginHost>,
        sessions: Arc<dyn SessionOpener>,
    ) -> Self {
        Self {
            storage,
            discovery,
            installer,
            host,
            sessions,
            transitions: StdMutex::new(HashMap::new()),
            loaded: RwLock::new(HashMap::new()),
            discovered: RwLock::new(BTreeMap::new()),
        }
    }

    fn transition_lock(&self, identifier: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(identifier.to_string()).or_default().clone()
    }

    async fn record(&self, identifier: &str) -> Result<Option<PluginRecord>, PluginError> {
        self.storage
            .get_plugin(identifier)
            .await
            .map_err(PluginError::Storage)
    }

    async fn set_status(
        &self,
        identifier: &str,
        location: &Path,
        status: PluginStatus,
    ) -> Result<(), PluginError> {
        self.storage
            .put_plugin(&PluginRecord {
                identifier: identifier.to_string(),
                location: location.to_path_buf(),
                status,
            })
            .await
            .map_err(PluginError::Storage)?;
        info!(plugin = %identifier, status = %status, "Plugin status changed");
        Ok(())
    }

    /// Snapshot of the loaded map.
    pub async fn loaded_plugins(&self) -> BTreeMap<String, LoadedPluginState> {
        self.loaded
            .read()
            .await
            .iter()
            .map(|(id, plugin)| {
                (
                    id.clone(),
                    LoadedPluginState {
                        running: plugin.running,
                    },
                )
            })
            .collect()
    }

    /// Scan for packages and record every unknown identifier as `available`.
    ///
    /// Idempotent; never touches existing records.
    pub async fn discover_plugins(&self) -> Result<Vec<DiscoveredPlugin>, PluginError> {
        let discovery = self.discovery.clone();
        let found = tokio::task::spawn_blocking(move || discovery.discover())
            .await
            .map_err(|e| PluginError::Discovery(e.into()))?
            .map_err(PluginError::Discovery)?;

        for plugin in &found {
            let identifier = plugin.identifier();
            if self.record(identifier).await?.is_some() {
                continue;
            }
            let lock = self.transition_lock(identifier);
            let _guard = lock.lock().await;
            if self.record(identifier).await?.is_none() {
                self.set_status(identifier, &plugin.location, PluginStatus::Available)
                    .await?;
            }
        }

        let mut discovered = self.discovered.write().await;
        for plugin in &found {
            discovered.insert(plugin.identifier().to_string(), plugin.clone());
        }
        debug!(count = found.len(), "Plugin discovery finished");
        Ok(found)
    }

    fn describe(
        record: &PluginRecord,
        discovered: &BTreeMap<String, DiscoveredPlugin>,
    ) -> Option<PluginInfo> {
        match read_manifest(&record.location) {
            Ok(manifest) => Some(manifest.info(&record.location)),
            Err(_) => discovered
                .get(&record.identifier)
                .map(|found| found.manifest.info(&found.location)),
        }
    }

    pub async fn list_plugins(&self) -> Result<ListPluginsResult, PluginError> {
        self.discover_plugins().await?;
        let records = self
            .storage
            .list_plugins()
            .await
            .map_err(PluginError::Storage)?;
        let discovered = self.discovered.read().await;

        let mut result = ListPluginsResult::default();
        for record in records {
            match Self::describe(&record, &discovered) {
                Some(info) => result.plugins.push(info),
                None => warn!(plugin = %record.identifier, location = ?record.location, "Plugin package is missing"),
            }
            result.state.insert(
                record.identifier.clone(),
                PluginState {
                    status: record.status,
                },
            );
        }
        Ok(result)
    }

    pub async fn inspect_plugin(&self, identifier: &str) -> Result<InspectPluginResult, PluginError> {
        self.discover_plugins().await?;
        let record = self
            .record(identifier)
            .await?
            .ok_or_else(|| PluginError::NotFound(identifier.to_string()))?;
        let plugin_info = Self::describe(&record, &*self.discovered.read().await).ok_or_else(|| {
            PluginError::InvalidPackage(format!("no manifest at {:?}", record.location))
        })?;
        let running = self.loaded.read().await.get(identifier).map(|p| p.running);
        Ok(InspectPluginResult {
            plugin_info,
            status: record.status,
            running,
        })
    }

    async fn resolve_package(&self, options: InstallPluginOptions) -> Result<DiscoveredPlugin, PluginError> {
        match options {
            InstallPluginOptions::Identifier { identifier } => {
                // Rescan so a package fixed on disk is picked up by a re-install.
                self.discover_plugins().await?;
                self.discovered
                    .read()
                    .await
                    .get(&identifier)
                    .cloned()
                    .ok_or(PluginError::NotFound(identifier))
            }
            InstallPluginOptions::Location { location } => {
                let discovery = self.discovery.clone();
                let package = tokio::task::spawn_blocking(move || discovery.read_package(&location))
                    .await
                    .map_err(|e| PluginError::Discovery(e.into()))?
                    .map_err(|e| PluginError::InvalidPackage(format!("{e:#}")))?;
                self.discovered
                    .write()
                    .await
                    .insert(package.identifier().to_string(), package.clone());
                Ok(package)
            }
        }
    }

    /// Install a discovered plugin or a package at a filesystem location, then start it.
    pub async fn install_plugin(&self, options: InstallPluginOptions) -> Result<PluginStatus, PluginError> {
        let package = self.resolve_package(options).await?;
        let identifier = package.identifier().to_string();
        let lock = self.transition_lock(&identifier);
        let _guard = lock.lock().await;

        if let Some(record) = self.record(&identifier).await? {
            if !record.status.is_installable() {
                return Err(PluginError::InvalidState {
                    identifier,
                    status: record.status,
                    action: "install",
                });
            }
        }

        self.set_status(&identifier, &package.location, PluginStatus::Installing)
            .await?;
        let location = match self.installer.install(&package) {
            Ok(location) => location,
            Err(e) => {
                warn!(plugin = %identifier, error = %e, "Plugin install step failed");
                self.set_status(&identifier, &package.location, PluginStatus::CouldNotInstall)
                    .await?;
                return Ok(PluginStatus::CouldNotInstall);
            }
        };

        if let Err(e) = self.start(&package.manifest, &location).await {
            warn!(plugin = %identifier, error = %e, "Installed plugin failed to start");
            self.set_status(&identifier, &location, PluginStatus::InstalledButErrored)
                .await?;
            return Ok(PluginStatus::InstalledButErrored);
        }
        self.commit_running(&identifier, &location, PluginStatus::SuccessfullyInstalled)
            .await
    }

    /// Start an installed plugin that is not running.
    pub async fn enable_plugin(&self, identifier: &str) -> Result<PluginStatus, PluginError> {
        let lock = self.transition_lock(identifier);
        let _guard = lock.lock().await;
        let record = self
            .record(identifier)
            .await?
            .ok_or_else(|| PluginError::NotFound(identifier.to_string()))?;

        match record.status {
            PluginStatus::DisablePending => {
                return Err(PluginError::RestartRequired(identifier.to_string()));
            }
            PluginStatus::Disabled | PluginStatus::InstalledButErrored => {}
            status if status.is_running_state() => {
                if self.loaded.read().await.contains_key(identifier) {
                    if status != PluginStatus::Enabled {
                        self.set_status(identifier, &record.location, PluginStatus::Enabled)
                            .await?;
                    }
                    return Ok(PluginStatus::Enabled);
                }
            }
            status => {
                return Err(PluginError::InvalidState {
                    identifier: identifier.to_string(),
                    status,
                    action: "enable",
                });
            }
        }

        let manifest = read_manifest(&record.location)
            .map_err(|e| PluginError::InvalidPackage(format!("{e:#}")))?;
        if let Err(e) = self.start(&manifest, &record.location).await {
            warn!(plugin = %identifier, error = %e, "Plugin failed to start");
            self.set_status(identifier, &record.location, PluginStatus::InstalledButErrored)
                .await?;
            return Ok(PluginStatus::InstalledButErrored);
        }
        self.commit_running(identifier, &record.location, PluginStatus::SuccessfullyEnabled)
            .await
    }

    /// Stop a running plugin.
    pub async fn disable_plugin(&self, identifier: &str) -> Result<PluginStatus, PluginError> {
        let lock = self.transition_lock(identifier);
        let _guard = lock.lock().await;
        let record = self
            .record(identifier)
            .await?
            .ok_or_else(|| PluginError::NotFound(identifier.to_string()))?;

        match record.status {
            PluginStatus::Disabled | PluginStatus::DisablePending => return Ok(record.status),
            status if status.is_running_state() => {}
            status => {
                return Err(PluginError::InvalidState {
                    identifier: identifier.to_string(),
                    status,
                    action: "disable",
                });
            }
        }

        self.set_status(identifier, &record.location, PluginStatus::Disabling)
            .await?;
        let instance = self
            .loaded
            .read()
            .await
            .get(identifier)
            .map(|plugin| plugin.instance.clone());
        let Some(instance) = instance else {
            self.set_status(identifier, &record.location, PluginStatus::Disabled)
                .await?;
            return Ok(PluginStatus::Disabled);
        };

        let status = match self.host.stop(instance).await {
            Ok(StopOutcome::Stopped) => {
                let unloaded = self.loaded.write().await.remove(identifier);
                if let Some(plugin) = unloaded {
                    plugin.session.destroy_session().await;
                }
                PluginStatus::Disabled
            }
            Ok(StopOutcome::NeedsRestart) => {
                // The instance stays in the loaded map so nothing can start it twice.
                let session = self.loaded.write().await.get_mut(identifier).map(|plugin| {
                    plugin.running = false;
                    plugin.session.clone()
                });
                if let Some(session) = session {
                    session.destroy_session().await;
                }
                PluginStatus::DisablePending
            }
            Err(e) => {
                warn!(plugin = %identifier, error = %e, "Plugin failed to stop");
                PluginStatus::CouldNotDisable
            }
        };
        self.set_status(identifier, &record.location, status).await?;
        Ok(status)
    }

    /// Persist the transient success state, then collapse it into `enabled`.
    ///
    /// If either write fails the freshly started plugin is unloaded again.
    async fn commit_running(
        &self,
        identifier: &str,
        location: &Path,
        transient: PluginStatus,
    ) -> Result<PluginStatus, PluginError> {
        let persisted = match self.set_status(identifier, location, transient).await {
            Ok(()) => self
                .set_status(identifier, location, PluginStatus::Enabled)
                .await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            self.unload(identifier).await;
            return Err(e);
        }
        Ok(PluginStatus::Enabled)
    }

    async fn start(&self, manifest: &PluginManifest, location: &Path) -> anyhow::Result<()> {
        let identifier = &manifest.identifier;
        let instance = self.host.start(manifest, location).await?;
        let session = self.sessions.open_session(Some(instance.callbacks())).await;

        if let Err(e) = self.connect(identifier, &session).await {
            session.destroy_session().await;
            if let Err(stop_err) = self.host.stop(instance).await {
                warn!(plugin = %identifier, error = %stop_err, "Could not stop plugin after failed connect");
            }
            return Err(e);
        }

        self.loaded.write().await.insert(
            identifier.clone(),
            LoadedPlugin {
                running: true,
                instance,
                session,
            },
        );
        Ok(())
    }

    /// Register the plugin's app on first start; identify with the stored credential afterwards.
    async fn connect(&self, identifier: &str, session: &Session) -> anyhow::Result<()> {
        match self.host.load_access_token(identifier).await? {
            Some(access_token) => {
                session
                    .identify_app(IdentifyAppOptions {
                        name: identifier.to_string(),
                        access_token,
                    })
                    .await?;
            }
            None => {
                let registered = match session
                    .register_app(RegisterAppOptions {
                        name: identifier.to_string(),
                        remote: false,
                        identify: true,
                    })
                    .await
                {
                    Ok(registered) => registered,
                    Err(ProtocolError::AppAlreadyExists) => {
                        error!(plugin = %identifier, "Plugin app is registered but its credential is missing");
                        bail!(
                            "app '{identifier}' already exists and the plugin host holds no credential for it"
                        );
                    }
                    Err(e) => return Err(e.into()),
                };
                // Without a stored credential the registration can never be used again, so undo it.
                if let Err(e) = self
                    .host
                    .store_access_token(identifier, &registered.access_token)
                    .await
                {
                    error!(plugin = %identifier, error = %e, "Could not store plugin credential, rolling back registration");
                    if let Err(rollback) = self.storage.delete_app(identifier).await {
                        error!(plugin = %identifier, error = %rollback, "Could not roll back plugin app registration");
                    }
                    return Err(e.context("store plugin credential"));
                }
            }
        }
        Ok(())
    }

    async fn unload(&self, identifier: &str) {
        let Some(plugin) = self.loaded.write().await.remove(identifier) else {
            return;
        };
        plugin.session.destroy_session().await;
        if let Err(e) = self.host.stop(plugin.instance).await {
            warn!(plugin = %identifier, error = %e, "Plugin failed to stop");
        }
    }

    /// Bring persisted state in line with a freshly started process.
    pub async fn load_plugins(&self) -> Result<(), PluginError> {
        if let Err(e) = self.discover_plugins().await {
            warn!(error = %e, "Plugin discovery failed during startup");
        }
        let records = self
            .storage
            .list_plugins()
            .await
            .map_err(PluginError::Storage)?;

        for record in records {
            let lock = self.transition_lock(&record.identifier);
            let _guard = lock.lock().await;
            let identifier = record.identifier.as_str();
            match record.status {
                status if status.is_running_state() => {
                    let started = match read_manifest(&record.location) {
                        Ok(manifest) => self.start(&manifest, &record.location).await,
                        Err(e) => Err(e),
                    };
                    let next = match started {
                        Ok(()) => PluginStatus::Enabled,
                        Err(e) => {
                            warn!(plugin = %identifier, error = %e, "Plugin failed to start after restart");
                            PluginStatus::InstalledButErrored
                        }
                    };
                    self.set_status(identifier, &record.location, next).await?;
                }
                PluginStatus::DisablePending | PluginStatus::Disabling => {
                    self.set_status(identifier, &record.location, PluginStatus::Disabled)
                        .await?;
                }
                PluginStatus::Installing => {
                    self.set_status(identifier, &record.location, PluginStatus::CouldNotInstall)
                        .await?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Stop every loaded plugin. Persisted statuses are left as they are.
    pub async fn shutdown(&self) {
        let loaded: Vec<(String, LoadedPlugin)> = self.loaded.write().await.drain().collect();
        for (identifier, plugin) in loaded {
            plugin.session.destroy_session().await;
            if plugin.running {
                if let Err(e) = self.host.stop(plugin.instance).await {
                    warn!(plugin = %identifier, error = %e, "Plugin failed to stop on shutdown");
                }
            }
        }
    }
}

#[async_trait]
impl PluginManagement for PluginManager {
    async fn list_plugins(&self) -> Result<ListPluginsResult, ProtocolError> {
        Ok(PluginManager::list_plugins(self).await?)
    }

    async fn install_plugin(&self, options: InstallPluginOptions) -> Result<(), ProtocolError> {
        let subject = match &options {
            InstallPluginOptions::Identifier { identifier } => identifier.clone(),
            InstallPluginOptions::Location { location } => location.display().to_string(),
        };
        let status = PluginManager::install_plugin(self, options).await?;
        match status {
            PluginStatus::CouldNotInstall | PluginStatus::InstalledButErrored => {
                Err(PluginError::TransitionFailed {
                    identifier: subject,
                    status,
                    action: "install",
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    async fn inspect_plugin(&self, identifier: &str) -> Result<InspectPluginResult, ProtocolError> {
        Ok(PluginManager::inspect_plugin(self, identifier).await?)
    }

    async fn enable_plugin(&self, identifier: &str) -> Result<(), ProtocolError> {
        match PluginManager::enable_plugin(self, identifier).await? {
            PluginStatus::InstalledButErrored => Err(PluginError::TransitionFailed {
                identifier: identifier.to_string(),
                status: PluginStatus::InstalledButErrored,
                action: "enable",
            }
            .into()),
            _ => Ok(()),
        }
    }

    async fn disable_plugin(&self, identifier: &str) -> Result<(), ProtocolError> {
        PluginManager::disable_plugin(self, identifier).await?;
        Ok(())
    }
}
