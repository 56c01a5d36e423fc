//! KnowStream CLI, a streaming knowledge-aggregation tool.
//!
//! Fans a query out to search and expert sources, scores and merges the
//! results, and streams progress to the terminal while it works.

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
