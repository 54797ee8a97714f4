mod cli;
mod commands;
mod config;
mod errors;
mod filter;
mod host;
mod item;
mod logging;
mod scheduler;
mod storage;
mod store;
mod tracker;
mod view;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::load()?;

    let code = commands::run(cli.command, &config).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
