mod api;
mod config;
mod gateway;
mod openapi;
mod progress;
mod relay;
mod resolver;
mod runner;
mod startup;
mod state;
mod storage;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "stem-split-server", version = VERSION)]
pub(crate) struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:5000
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Optional server config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for uploaded tracks (overrides config)
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Directory the separator writes stems into (overrides config)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,stem_split_server=info")
        }))
        .init();

    startup::run(args).await
}
