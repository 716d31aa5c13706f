//! Outpost - fleet agent that runs signed jobs from a control plane

use clap::Parser;

use outpost_agent::app::exit_code;
use outpost_agent::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = cli.run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}
