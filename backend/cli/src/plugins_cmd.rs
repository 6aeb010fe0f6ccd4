//! CLI Plugins Subcommands
//!
//! Drive the plugin manager against the configured database.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgGroup, Subcommand};
use serde_json::json;
use storehub_core::InstallPluginOptions;
use storehub_hub::Application;

use crate::output::print_json;

#[derive(Subcommand)]
pub enum PluginCommands {
    /// List discovered and installed plugins with their status
    List,
    /// Install a plugin by identifier or from a package directory
    #[command(group(ArgGroup::new("source").required(true).args(["identifier", "location"])))]
    Install {
        #[arg(long)]
        identifier: Option<String>,
        #[arg(long)]
        location: Option<PathBuf>,
    },
    /// Show one plugin's info, status and whether it is running
    Inspect { identifier: String },
    /// Start an installed plugin
    Enable { identifier: String },
    /// Stop a running plugin
    Disable { identifier: String },
}

pub async fn run(app: &Application, cmd: PluginCommands) -> Result<()> {
    let plugins = app.plugins();
    match cmd {
        PluginCommands::List => {
            let listed = plugins.list_plugins().await?;
            print_json(&json!({
                "plugins": listed.plugins,
                "state": listed.state,
                "loaded": plugins.loaded_plugins().await,
            }))
        }
        PluginCommands::Install { identifier, location } => {
            let options = match (identifier, location) {
                (Some(identifier), _) => InstallPluginOptions::Identifier { identifier },
                (None, Some(location)) => InstallPluginOptions::Location { location },
                (None, None) => anyhow::bail!("either --identifier or --location is required"),
            };
            let status = plugins.install_plugin(options).await?;
            print_json(&json!({ "status": status }))
        }
        PluginCommands::Inspect { identifier } => {
            print_json(&plugins.inspect_plugin(&identifier).await?)
        }
        PluginCommands::Enable { identifier } => {
            let status = plugins.enable_plugin(&identifier).await?;
            print_json(&json!({ "identifier": identifier, "status": status }))
        }
        PluginCommands::Disable { identifier } => {
            let status = plugins.disable_plugin(&identifier).await?;
            print_json(&json!({ "identifier": identifier, "status": status }))
        }
    }
}
