mod apps_cmd;
mod output;
mod plugins_cmd;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use storehub_config::HubConfig;
use storehub_hub::{Application, ApplicationDeps};

use apps_cmd::AppCommands;
use plugins_cmd::PluginCommands;

#[derive(Parser)]
#[command(name = "storehub")]
#[command(about = "Local hub for apps sharing one store")]
#[command(version)]
struct Cli {
    /// TOML config file (overrides STOREHUB_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub until interrupted
    Serve,
    /// Manage plugins in the configured database
    #[command(subcommand)]
    Plugins(PluginCommands),
    /// Manage registered apps
    #[command(subcommand)]
    Apps(AppCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HubConfig::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    storehub_logging::init_logger(&config.log_dir, &config.log_level)?;

    let app = Application::setup(&config, ApplicationDeps::default()).await?;
    let outcome = match cli.command {
        Commands::Serve => serve(&app, &config).await,
        Commands::Plugins(cmd) => plugins_cmd::run(&app, cmd).await,
        Commands::Apps(cmd) => apps_cmd::run(&app, cmd).await,
    };
    app.shutdown().await;
    outcome
}

async fn serve(app: &Application, config: &HubConfig) -> Result<()> {
    info!(
        port = config.port,
        db = ?config.db_path,
        plugins = app.plugins().loaded_plugins().await.len(),
        "storehub running, press Ctrl-C to stop"
    );
    shutdown_signal().await?;
    info!("Shutdown signal received");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
