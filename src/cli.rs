use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "batchfetch")]
#[command(about = "Batch downloader for CSV lists of URLs or product timestamps", long_about = None)]
pub struct Cli {
    /// Configuration file (default: $BATCHFETCH_CONFIG or config/batchfetch.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Server(ServerArgs),
    /// Download one CSV into a ZIP archive without starting the server
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// CSV file with URLs or timestamps
    #[arg(short, long)]
    pub input: PathBuf,

    /// Where to write the resulting archive
    #[arg(short, long, default_value = "batchfetch.zip")]
    pub output: PathBuf,

    /// Product to look up for timestamp rows, may be repeated
    #[arg(long = "product", value_name = "PRODUCT")]
    pub products: Vec<String>,

    /// Catalogue collection override
    #[arg(long)]
    pub collection: Option<String>,

    /// Processing baseline override
    #[arg(long)]
    pub baseline: Option<String>,
}
