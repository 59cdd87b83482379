//! benchforge CLI: builds agent-evaluation benchmarks from public corpora.
//!
//! Samples GAIA and GSM8K questions, annotates them with expected
//! reasoning traces, and uploads the resulting files to a dataset store.

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
