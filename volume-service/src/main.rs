// SPDX-License-Identifier: GPL-3.0-only

//! volumed - volume lifecycle service
//!
//! Builds one lifecycle manager per configured driver and serves a line
//! oriented command shell on stdin, answering in JSON on stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

mod adapters;
mod config;
mod logging;
mod routing;
mod shell;

use config::Config;
use routing::DriverRegistry;
use shell::{Reply, Shell};

#[derive(Debug, Parser)]
#[command(name = "volumed", version, about = "Volume lifecycle service")]
struct Args {
    /// Configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = "/etc/volumed/volumed.toml")]
    config: PathBuf,

    /// Driver selected at startup (defaults to the first configured one)
    #[arg(short, long)]
    driver: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let _log_guard = logging::init(&config);

    tracing::info!("Starting volumed v{}", env!("CARGO_PKG_VERSION"));

    let registry = DriverRegistry::build(&config)?;
    let mut shell = Shell::new(registry);
    if let Some(driver) = &args.driver {
        shell.select(driver)?;
    }
    tracing::info!(driver = shell.current_driver(), "ready for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                None
            }
        };
        let Some(line) = line else { break };

        match shell.handle_line(&line).await {
            Some(Reply::Json(value)) => println!("{value}"),
            Some(Reply::Quit) => break,
            None => {}
        }
    }

    shell.shutdown().await;
    tracing::info!("volumed stopped");
    Ok(())
}
