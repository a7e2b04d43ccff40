//! Jacobine - Main entry point for the pipeline binaries.

use clap::Parser;

use jacobine::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    jacobine::cli::run(cli).await
}
