pub mod builtin;
pub mod discovery;
pub mod error;
pub mod host;
pub mod installer;
pub mod manager;
pub mod manifest;

pub use builtin::{ECHO_ENTRY, EchoPlugin};
pub use discovery::{DiscoveredPlugin, ManifestDiscovery, PluginDiscovery};
pub use error::PluginError;
pub use host::{BuiltinPluginHost, PluginFactory, PluginHost, PluginInstance, StopOutcome};
pub use installer::PluginInstaller;
pub use manager::{LoadedPluginState, PluginManager, SessionOpener};
pub use manifest::{MANIFEST_FILE_NAME, PluginManifest};
