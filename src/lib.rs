pub mod analysis;
mod cli;
pub mod device;
pub mod errors;
pub mod models;
pub mod recorder;
pub mod sensing;
pub mod session;
pub mod settings;
mod utils;

use anyhow::Context;
use clap::Parser;

pub fn run() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    let level = if settings::debug_logging_requested() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let args = cli::Args::parse();
    log::debug!("swingtrack starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(cli::execute(args))
}
