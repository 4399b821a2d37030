mod cli;
mod local;

use batchfetch::config::Config;
use batchfetch::observability::init_tracing;
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Server(args) => batchfetch::api::run(config, args.address).await?,
        Commands::Run(args) => local::run(config, args).await?,
    }

    Ok(())
}
