//! `biome-radar verify`: run one join through admission and biome verification.

use std::collections::BTreeMap;
use std::sync::PoisonError;

use biome_radar_source_log::FsLogSource;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::VerifyOpts;
use crate::config::Config;
use crate::context;
use crate::join::{
    Admission, DETECTION_SCOPE, JoinOutcome, JoinPipeline, JoinRequest, JoinSettings, Trigger,
    Verdict, bypass_requested,
};
use crate::join_store::{JoinId, JoinStore, JoinTag, NewJoin, RecentJoin};

#[derive(Debug, Serialize)]
struct VerifyReport {
    admission: Admission,
    #[serde(skip_serializing_if = "Option::is_none")]
    join_id: Option<JoinId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    primary_tag: Option<JoinTag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    join: Option<RecentJoin>,
}

fn build_request(opts: &VerifyOpts) -> JoinRequest {
    let bypass = opts.bypass || opts.message.as_deref().is_some_and(bypass_requested);
    let metadata = BTreeMap::from([(
        "trigger_kind".to_owned(),
        serde_json::to_value(opts.trigger_kind).unwrap_or_default(),
    )]);
    JoinRequest {
        trigger: Trigger {
            name: opts.expect.clone(),
            kind: opts.trigger_kind,
            priority: opts.priority,
            cooldown_secs: opts.cooldown_secs,
            join_enabled: true,
        },
        bypass_redundant: bypass,
        details: NewJoin {
            title: opts.expect.clone(),
            description: opts.message.clone(),
            metadata,
            ..NewJoin::default()
        },
    }
}

async fn verify(
    pipeline: &JoinPipeline<FsLogSource>,
    request: &JoinRequest,
    outcome: &JoinOutcome,
) -> anyhow::Result<VerifyReport> {
    let admission = pipeline.admit(request, Utc::now());
    if !admission.is_allowed() {
        info!(admission = ?admission, "join not admitted");
        return Ok(VerifyReport {
            admission,
            join_id: None,
            verdict: None,
            primary_tag: None,
            join: None,
        });
    }

    let (id, mut handle) = pipeline.record_join(request, outcome, Utc::now());
    let verdict = tokio::select! {
        v = &mut handle => v?,
        res = context::shutdown_signal() => {
            res?;
            pipeline.detector().clear_scope(DETECTION_SCOPE);
            handle.await?
        }
    };

    let join = pipeline
        .store()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(id)
        .cloned();
    Ok(VerifyReport {
        admission,
        join_id: Some(id),
        verdict: Some(verdict),
        primary_tag: join.as_ref().map(RecentJoin::primary_tag),
        join,
    })
}

pub async fn cmd_verify(config: &Config, opts: VerifyOpts) -> anyhow::Result<()> {
    let detector = context::build_detector(config, opts.log_dir.clone())?;
    let names = context::account_names(config, &opts.accounts);
    context::track_accounts(&detector, config, &names).await;

    let store_path = config.store_path();
    let store = store_path
        .as_deref()
        .map(JoinStore::load)
        .unwrap_or_default();

    let settings = JoinSettings::from_config(config);
    if settings.detection_enabled {
        // catch up on the current tail so only post-join records count
        detector.run_cycle().await;
        detector.start(config.poll_interval());
    }

    let pipeline = JoinPipeline::new(detector, store, settings);
    let outcome = JoinOutcome {
        joined: !opts.not_joined,
        link: opts.link,
    };
    let report = verify(&pipeline, &build_request(&opts), &outcome).await;
    pipeline.detector().stop();
    let report = report?;

    if report.join_id.is_some() {
        match store_path {
            Some(path) => {
                let store = pipeline
                    .store()
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                store.save(&path)?;
            }
            None => warn!("no store path (HOME unset); join not persisted"),
        }
    }

    context::print_json(&report)
}
