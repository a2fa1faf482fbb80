//! `exchange` — the process that hosts one match.
//!
//! Loads a JSON configuration file, starts the two order books, the
//! execution and information servers, the market-event replay reader, and
//! the two CSV writer threads, then drives the match to completion.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use exchange_core::engine::config::Config;
use exchange_core::engine::controller::{base_dir_for_config, Controller};

#[derive(Parser, Debug)]
#[command(name = "exchange", about = "Matching engine for a two-instrument trading-competition exchange")]
struct Args {
    /// Path to the match's JSON configuration file.
    #[arg(long, default_value = "./exchange.json")]
    config: PathBuf,

    /// Log level: error, warn, info, debug, or trace.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load(&args.config)?;
    let base_dir = base_dir_for_config(&args.config);

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let local = tokio::task::LocalSet::new();

    local.block_on(&runtime, async move {
        let controller = Controller::build(config, &base_dir).await?;
        controller.run().await
    })?;

    Ok(())
}
