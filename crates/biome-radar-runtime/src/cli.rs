//! CLI definition using clap derive.

use std::path::PathBuf;

use biome_radar_core::defaults::MAX_PRIORITY;
use clap::{Parser, Subcommand};

use crate::join::{LinkCheck, TriggerKind};
use crate::join_store::JoinTag;

#[derive(Parser)]
#[command(
    name = "biome-radar",
    version,
    about = "Biome detection from game client logs"
)]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/biome-radar/config.toml)
    #[arg(long, short = 'c', global = true, env = "BIOME_RADAR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Track accounts and print detection events as JSON lines
    Watch(WatchOpts),
    /// Parse one log tail and print the scan as JSON
    Scan(ScanOpts),
    /// Print account id -> log file bindings as JSON
    Discover(DiscoverOpts),
    /// Verify one join against the detector and record it
    Verify(VerifyOpts),
    /// Show recently recorded joins
    History(HistoryOpts),
}

#[derive(clap::Args)]
pub struct WatchOpts {
    /// Poll interval in milliseconds (overrides config)
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Client log directory (overrides config)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Account display name to track; repeatable (overrides config)
    #[arg(long = "account", short = 'a')]
    pub accounts: Vec<String>,
}

#[derive(clap::Args)]
pub struct ScanOpts {
    /// Log file to scan
    pub path: PathBuf,

    /// Bytes read from the end of the file
    #[arg(long)]
    pub window_bytes: Option<u64>,

    /// Treat records as marker..`}}}` spans instead of whole lines
    #[arg(long)]
    pub partial: bool,
}

#[derive(clap::Args)]
pub struct DiscoverOpts {
    /// Client log directory (overrides config)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct VerifyOpts {
    /// Biome the join is expected to land in
    #[arg(long)]
    pub expect: String,

    #[arg(long, value_enum, default_value = "rare-biome")]
    pub trigger_kind: TriggerKind,

    /// Cooldown priority of the trigger
    #[arg(
        long,
        default_value = "1",
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_PRIORITY))
    )]
    pub priority: u32,

    #[arg(long, default_value = "120")]
    pub cooldown_secs: u64,

    /// Result of the link check
    #[arg(long, value_enum, default_value = "not-verified")]
    pub link: LinkCheck,

    /// Record the join as failed
    #[arg(long)]
    pub not_joined: bool,

    /// Join message; bypass words in it skip the already-in-biome check
    #[arg(long)]
    pub message: Option<String>,

    /// Skip the already-in-biome check
    #[arg(long)]
    pub bypass: bool,

    /// Client log directory (overrides config)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Account display name to track; repeatable (overrides config)
    #[arg(long = "account", short = 'a')]
    pub accounts: Vec<String>,
}

#[derive(clap::Args)]
pub struct HistoryOpts {
    /// Number of joins to show
    #[arg(long, short = 'n', default_value = "10")]
    pub limit: usize,

    /// Only joins carrying this tag
    #[arg(long, value_enum)]
    pub tag: Option<JoinTag>,

    /// Drop joins older than this many days before listing
    #[arg(long)]
    pub clean_days: Option<u32>,

    /// Delete every recorded join
    #[arg(long, conflicts_with_all = ["tag", "clean_days"])]
    pub clear: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verify_defaults() {
        let cli = Cli::try_parse_from(["biome-radar", "verify", "--expect", "GLITCHED"]).expect("test");
        let Command::Verify(opts) = cli.command else {
            panic!("expected verify");
        };
        assert_eq!(opts.expect, "GLITCHED");
        assert_eq!(opts.trigger_kind, TriggerKind::RareBiome);
        assert_eq!(opts.link, LinkCheck::NotVerified);
        assert_eq!(opts.priority, 1);
        assert!(!opts.not_joined);
    }

    #[test]
    fn verify_rejects_out_of_range_priority() {
        for priority in ["0", "4000000000"] {
            let parsed = Cli::try_parse_from([
                "biome-radar",
                "verify",
                "--expect",
                "GLITCHED",
                "--priority",
                priority,
            ]);
            assert!(parsed.is_err(), "priority {priority} accepted");
        }

        let max = MAX_PRIORITY.to_string();
        let cli = Cli::try_parse_from([
            "biome-radar",
            "verify",
            "--expect",
            "GLITCHED",
            "--priority",
            max.as_str(),
        ])
        .expect("test");
        let Command::Verify(opts) = cli.command else {
            panic!("expected verify");
        };
        assert_eq!(opts.priority, MAX_PRIORITY);
    }

    #[test]
    fn watch_accepts_repeated_accounts() {
        let cli = Cli::try_parse_from([
            "biome-radar",
            "--config",
            "/tmp/c.toml",
            "watch",
            "-a",
            "alice",
            "--account",
            "bob",
            "--interval-ms",
            "500",
        ])
        .expect("test");
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        let Command::Watch(opts) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(opts.accounts, vec!["alice", "bob"]);
        assert_eq!(opts.interval_ms, Some(500));
    }

    #[test]
    fn scan_takes_a_path() {
        let cli = Cli::try_parse_from(["biome-radar", "scan", "x.log", "--partial"]).expect("test");
        let Command::Scan(opts) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(opts.path, PathBuf::from("x.log"));
        assert!(opts.partial);
    }

    #[test]
    fn history_tag_uses_store_names() {
        let cli = Cli::try_parse_from(["biome-radar", "history", "--tag", "biome-verified-bait"])
            .expect("test");
        let Command::History(opts) = cli.command else {
            panic!("expected history");
        };
        assert_eq!(opts.tag, Some(JoinTag::BiomeVerifiedBait));
        assert_eq!(opts.limit, 10);
    }
}
