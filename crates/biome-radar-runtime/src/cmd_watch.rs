//! `biome-radar watch`: stream detection events as JSON lines.

use std::time::Duration;

use biome_radar_core::defaults::clamp_poll_interval_ms;
use biome_radar_core::{DetectionEvent, DetectionEventKind};

use crate::cli::WatchOpts;
use crate::config::Config;
use crate::context;

/// One JSON object per line, in emission order.
fn event_line(event: &DetectionEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

pub async fn cmd_watch(config: &Config, opts: WatchOpts) -> anyhow::Result<()> {
    if !config.detector.enabled {
        anyhow::bail!("detection is disabled in the config ([detector] enabled = false)");
    }

    let detector = context::build_detector(config, opts.log_dir)?;
    let names = context::account_names(config, &opts.accounts);
    context::track_accounts(&detector, config, &names).await;

    for kind in DetectionEventKind::ALL {
        detector.bus().on(kind, |event: &DetectionEvent| match event_line(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to encode event"),
        });
    }

    let interval = opts
        .interval_ms
        .map(|ms| Duration::from_millis(clamp_poll_interval_ms(ms)))
        .unwrap_or_else(|| config.poll_interval());
    detector.start(interval);

    let result = context::shutdown_signal().await;
    detector.stop();
    detector.bus().remove_all_listeners();
    result
}
