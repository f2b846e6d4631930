//! `biome-radar history`: list, clean or clear recorded joins.

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::HistoryOpts;
use crate::config::Config;
use crate::context;
use crate::join_store::{JoinStore, JoinTag, RecentJoin};

#[derive(Debug, Serialize)]
struct HistoryRow<'a> {
    id: i64,
    timestamp: DateTime<Utc>,
    title: &'a str,
    primary_tag: JoinTag,
    label: &'static str,
    tags: &'a [JoinTag],
}

impl<'a> From<&'a RecentJoin> for HistoryRow<'a> {
    fn from(join: &'a RecentJoin) -> Self {
        let primary = join.primary_tag();
        Self {
            id: join.id,
            timestamp: join.timestamp,
            title: &join.title,
            primary_tag: primary,
            label: primary.label(),
            tags: &join.tags,
        }
    }
}

fn rows(store: &JoinStore, tag: Option<JoinTag>, limit: usize) -> Vec<HistoryRow<'_>> {
    match tag {
        Some(tag) => store
            .by_tag(tag)
            .into_iter()
            .take(limit)
            .map(HistoryRow::from)
            .collect(),
        None => store.recent(limit).iter().map(HistoryRow::from).collect(),
    }
}

pub fn cmd_history(config: &Config, opts: HistoryOpts) -> anyhow::Result<()> {
    let path = config
        .store_path()
        .context("no join store path configured and HOME is unset")?;
    let mut store = JoinStore::load(&path);

    if opts.clear {
        store.clear();
        store.save(&path)?;
        println!("join history cleared");
        return Ok(());
    }

    if let Some(days) = opts.clean_days {
        if store.clean_older_than(days, Utc::now()) > 0 {
            store.save(&path)?;
        }
    }

    context::print_json(&rows(&store, opts.tag, opts.limit))
}
