//! confmap CLI: conference listing crawler and catalog builder.
//!
//! Crawls per-category conference listings, geocodes their locations, and
//! stores the accepted conferences in one table per category.

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
