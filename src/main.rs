//! The benchbot hardware control daemon.
//!
//! Boots the hardware (or its simulation), then holds the executor until
//! the process is asked to stop. Higher layers attach to the executor
//! handle; nothing else in the process may talk to the board directly.

use anyhow::Result;
use benchbot::{boot, config::Settings};
use clap::Parser;
use log::info;

#[derive(Parser)]
#[command(name = "benchbot", about = "Hardware control daemon for the benchbot robot")]
struct Cli {
    /// Path to a TOML settings file.
    #[arg(short, long)]
    config: Option<String>,

    /// Force the simulated backend regardless of settings.
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut settings = Settings::new(cli.config.as_deref())?;
    if cli.simulate {
        settings.boot.simulate = true;
    }

    let executor = boot::initialize(&settings).await?;
    if executor.is_simulated().await? {
        info!("hardware ready (simulated backend)");
    } else {
        info!("hardware ready");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    drop(executor);
    Ok(())
}
