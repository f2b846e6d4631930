//! biome-radar: biome detection from game client logs.
//! Tracks accounts' client logs, publishes biome changes, and verifies joins
//! against what the client actually reports.

use biome_radar_runtime::{cli, cmd_history, cmd_scan, cmd_verify, cmd_watch, config};
use clap::Parser;

fn log_filter(config_level: Option<&str>) -> String {
    std::env::var("BIOME_RADAR_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .or_else(|| config_level.map(str::to_owned))
        .unwrap_or_else(|| "info".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let (config, config_path) = config::Config::load(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(log_filter(
            config.log_level.as_deref(),
        )))
        .with_writer(std::io::stderr)
        .init();

    match &config_path {
        Some(path) => tracing::debug!(path = %path.display(), "config loaded"),
        None => tracing::debug!("no config file; using defaults"),
    }

    match args.command {
        cli::Command::Watch(opts) => {
            tracing::info!("biome-radar watch starting");
            cmd_watch::cmd_watch(&config, opts).await?;
        }
        cli::Command::Scan(opts) => cmd_scan::cmd_scan(&config, opts).await?,
        cli::Command::Discover(opts) => cmd_scan::cmd_discover(&config, opts).await?,
        cli::Command::Verify(opts) => cmd_verify::cmd_verify(&config, opts).await?,
        cli::Command::History(opts) => cmd_history::cmd_history(&config, opts)?,
    }

    Ok(())
}
