//! ingestkit CLI: run the ingestion orchestrator against configured connectors.
//!
//! Reads connector declarations from a TOML config, executes a request, and
//! prints a summary or writes the full run report as JSON.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
