//! Shared setup for the commands: detector construction, account tracking
//! and shutdown signals.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use biome_radar_detector::BiomeDetector;
use biome_radar_source_log::FsLogSource;
use serde::Serialize;

use crate::config::Config;
use crate::lookup::StaticLookup;

/// Log directory from the command line, else the config, else the client default.
pub fn resolve_log_dir(config: &Config, flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    flag.or_else(|| config.log_dir())
        .context("no log directory configured and HOME/USERPROFILE is unset")
}

pub fn build_detector(
    config: &Config,
    log_dir: Option<PathBuf>,
) -> anyhow::Result<Arc<BiomeDetector<FsLogSource>>> {
    let dir = resolve_log_dir(config, log_dir)?;
    tracing::debug!(log_dir = %dir.display(), "using log directory");
    Ok(Arc::new(BiomeDetector::new(
        FsLogSource::new(dir),
        config.detector_config(),
    )))
}

/// Account names from the command line, else from the config.
pub fn account_names(config: &Config, flags: &[String]) -> Vec<String> {
    if flags.is_empty() {
        config.detector.accounts.clone()
    } else {
        flags.to_vec()
    }
}

/// Resolve `names` through the config's account table and track them.
pub async fn track_accounts(
    detector: &BiomeDetector<FsLogSource>,
    config: &Config,
    names: &[String],
) -> usize {
    let lookup = StaticLookup::new(config.accounts.clone());
    let tracked = detector.set_accounts(&lookup, names).await;
    if tracked == 0 {
        tracing::warn!(
            requested = names.len(),
            "no accounts resolved; add them under [accounts] or pass numeric ids"
        );
    }
    tracked
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
pub async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to register SIGTERM handler")?;
        tokio::select! {
            res = ctrl_c => {
                res.context("failed to listen for ctrl-c")?;
                tracing::info!("received ctrl-c, shutting down");
            }
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("failed to listen for ctrl-c")?;
        tracing::info!("received ctrl-c, shutting down");
    }

    Ok(())
}
