//! CLI argument parsing with clap derive

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::{Bootstrap, init_tracing};
use crate::commands;

/// Fleet agent that runs signed jobs from a control plane
#[derive(Parser)]
#[command(
    name = "outpost",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Agent home directory (keys and queue)
    #[arg(long, global = true, env = "OUTPOST_HOME")]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Activate if needed, register, and run the agent
    Launch,

    /// Run only the activation handshake and print the host UUID
    Activate,

    /// Show activation and queue state
    Status(commands::status::StatusArgs),
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or the command fails.
    pub async fn run(self) -> Result<()> {
        let Cli { home, command } = self;
        let boot = Bootstrap::load(home.as_deref())?;
        init_tracing(boot.config.debug);
        match command {
            Command::Launch => commands::launch::run(boot).await,
            Command::Activate => commands::activate::run(boot).await,
            Command::Status(args) => commands::status::run(&boot, &args),
        }
    }
}
