use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

/// A persisted app identity. The identifier doubles as the app's schema namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub identifier: String,
    pub access_key_hash: String,
    pub is_remote: bool,
    #[serde(default)]
    pub schema: AppSchema,
}

/// Fields needed to create an [`App`] record.
#[derive(Debug, Clone)]
pub struct NewApp {
    pub identifier: String,
    pub access_key_hash: String,
    pub is_remote: bool,
}

/// Collections an app asks the hub to manage, keyed by `<namespace>:<localName>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSchema {
    #[serde(default)]
    pub collection_definitions: BTreeMap<String, serde_json::Value>,
}

impl AppSchema {
    /// Merge `other` into `self`. Collections are only ever added or redefined.
    pub fn merge(&mut self, other: &AppSchema) {
        for (name, definition) in &other.collection_definitions {
            self.collection_definitions
                .insert(name.clone(), definition.clone());
        }
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collection_definitions.keys().map(String::as_str)
    }
}

/// Persisted install/enable state of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginStatus {
    Available,
    Installing,
    CouldNotInstall,
    InstalledButErrored,
    SuccessfullyInstalled,
    Enabled,
    SuccessfullyEnabled,
    Disabled,
    Disabling,
    CouldNotDisable,
    DisablePending,
}

impl PluginStatus {
    pub const ALL: [PluginStatus; 11] = [
        PluginStatus::Available,
        PluginStatus::Installing,
        PluginStatus::CouldNotInstall,
        PluginStatus::InstalledButErrored,
        PluginStatus::SuccessfullyInstalled,
        PluginStatus::Enabled,
        PluginStatus::SuccessfullyEnabled,
        PluginStatus::Disabled,
        PluginStatus::Disabling,
        PluginStatus::CouldNotDisable,
        PluginStatus::DisablePending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginStatus::Available => "available",
            PluginStatus::Installing => "installing",
            PluginStatus::CouldNotInstall => "could-not-install",
            PluginStatus::InstalledButErrored => "installed-but-errored",
            PluginStatus::SuccessfullyInstalled => "successfully-installed",
            PluginStatus::Enabled => "enabled",
            PluginStatus::SuccessfullyEnabled => "successfully-enabled",
            PluginStatus::Disabled => "disabled",
            PluginStatus::Disabling => "disabling",
            PluginStatus::CouldNotDisable => "could-not-disable",
            PluginStatus::DisablePending => "disable-pending",
        }
    }

    /// States in which the plugin is expected to be running.
    ///
    /// `successfully-installed` and `successfully-enabled` are display states
    /// that collapse into `enabled`; `could-not-disable` leaves the plugin up.
    pub fn is_running_state(&self) -> bool {
        matches!(
            self,
            PluginStatus::Enabled
                | PluginStatus::SuccessfullyEnabled
                | PluginStatus::SuccessfullyInstalled
                | PluginStatus::CouldNotDisable
        )
    }

    /// Whether an install request may start from this state.
    ///
    /// A plugin that installed but failed to start can be installed again
    /// once its package is fixed.
    pub fn is_installable(&self) -> bool {
        matches!(
            self,
            PluginStatus::Available
                | PluginStatus::CouldNotInstall
                | PluginStatus::InstalledButErrored
        )
    }
}

impl std::fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PluginStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown plugin status '{s}'"))
    }
}

/// Persisted plugin record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRecord {
    pub identifier: String,
    pub location: PathBuf,
    pub status: PluginStatus,
}
