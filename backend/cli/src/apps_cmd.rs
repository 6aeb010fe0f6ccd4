//! CLI Apps Subcommands

use anyhow::Result;
use clap::Subcommand;
use storehub_core::RegisterAppOptions;
use storehub_hub::Application;

use crate::output::print_json;

#[derive(Subcommand)]
pub enum AppCommands {
    /// Register an app and print its access token (shown only once)
    Register {
        name: String,
        /// Mark the app as running outside this machine
        #[arg(long)]
        remote: bool,
    },
}

pub async fn run(app: &Application, cmd: AppCommands) -> Result<()> {
    match cmd {
        AppCommands::Register { name, remote } => {
            let session = app.open_session(None);
            let issued = session
                .register_app(RegisterAppOptions {
                    name,
                    remote,
                    identify: false,
                })
                .await;
            session.destroy_session().await;
            print_json(&issued?)
        }
    }
}
