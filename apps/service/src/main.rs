#![warn(clippy::all)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info};

mod app;
mod config;

use config::Config;

#[derive(Parser, Debug)]
#[command(name = "watchpost", version, about = "Periodic ping and process health checks")]
struct Cli {
    /// Config file; defaults to $XDG_CONFIG_HOME/watchpost/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single sweep and exit non-zero if anything failed
    #[arg(long)]
    once: bool,

    /// Validate the config, print it and exit
    #[arg(long, conflicts_with = "once")]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("loading config")?;
    logger::init(&config.log_config()?).context("installing logger")?;
    debug!("{config}");

    if cli.check_config {
        let scheduler = app::build_scheduler(&config).await?;
        println!("{config}");
        println!("Config OK, sweeping every {:?}", scheduler.interval());
        return Ok(ExitCode::SUCCESS);
    }

    let scheduler = app::build_scheduler(&config).await?;

    if cli.once {
        let summary = scheduler.sweep().await;
        return Ok(if summary.events == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    info!(interval = ?scheduler.interval(), "watchpost started");
    scheduler
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "could not listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await;

    Ok(ExitCode::SUCCESS)
}
