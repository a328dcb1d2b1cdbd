use anyhow::Result;
use clap::Parser;

use chat_relay::{cli::Cli, runtime::Orchestrator, utils::init_logger};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    init_logger(cli.verbose);

    // Startup failures (missing credential, bind errors) exit non-zero here
    let orchestrator = Orchestrator::new(cli)?;
    orchestrator.run().await
}
