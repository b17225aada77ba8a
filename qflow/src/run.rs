//! Drive one pipeline run: build the tree, stream its events, log them.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use tracing::{error, info, instrument};

use crate::core::types::Event;
use crate::engine::context::RunContext;
use crate::engine::inbox::SlotGuard;
use crate::io::config::PipelineConfig;
use crate::io::run_log::{RunLog, RunSummary};
use crate::stages::{Collaborators, build_pipeline};

/// Run the pipeline over `ctx` to completion.
///
/// Every event is appended to `log` (when given) and then handed to
/// `on_event`, in production order. The summary is written even when the run
/// ends on a contract violation or a failed log append; that error is
/// returned afterwards.
///
/// The run's inbox slot lives exactly as long as this future, so a run that
/// is dropped mid-review releases its slot too.
#[instrument(skip_all, fields(run_id = %ctx.run_id, user_id = %ctx.user_id, nodes = ctx.state.nodes.len()))]
pub async fn run_pipeline<F>(
    collaborators: &Collaborators,
    cfg: &PipelineConfig,
    ctx: &mut RunContext,
    mut log: Option<RunLog>,
    mut on_event: F,
) -> Result<RunSummary>
where
    F: FnMut(&Event),
{
    let _slot = SlotGuard::open(Arc::clone(&ctx.inbox), ctx.inbox_key());
    let pipeline = build_pipeline(collaborators, cfg, &ctx.state);
    let mut count = 0usize;
    let mut failure = None;
    {
        let mut events = pipeline.execute(ctx);
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    count += 1;
                    if let Some(log) = log.as_mut()
                        && let Err(err) = log.append(&event)
                    {
                        error!(err = %err, "run log append failed, stopping run");
                        failure = Some(err);
                        break;
                    }
                    on_event(&event);
                }
                Err(err) => {
                    error!(err = %err, "run aborted");
                    failure = Some(err);
                    break;
                }
            }
        }
    }

    let summary = RunSummary::from_state(
        &ctx.run_id,
        &ctx.user_id,
        count,
        &ctx.state,
        failure.as_ref().map(|err| format!("{err:#}")),
    );
    if let Some(log) = log {
        let paths = log.finish(&summary)?;
        info!(dir = %paths.dir.display(), "run log written");
    }
    match failure {
        Some(err) => Err(err),
        None => {
            info!(events = count, fully_verified = summary.fully_verified, "run finished");
            Ok(summary)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::state::ContractViolation;
    use crate::core::types::Resolution;
    use crate::engine::inbox::Inbox;
    use crate::test_support::{dag_node, linear_dag, scripted_collaborators};

    #[tokio::test]
    async fn streams_events_and_writes_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let scripted = scripted_collaborators();
        let mut ctx = RunContext::new("alice", linear_dag(2), Arc::new(Inbox::new()))
            .with_run_id("run-7");
        let log = RunLog::create(temp.path(), &ctx.run_id).expect("log");

        let mut seen = Vec::new();
        let summary = run_pipeline(
            &scripted.collaborators(),
            &PipelineConfig::default(),
            &mut ctx,
            Some(log),
            |event| seen.push(event.author.clone()),
        )
        .await
        .expect("run");

        assert!(summary.fully_verified);
        assert_eq!(summary.event_count, seen.len());
        assert_eq!(
            seen,
            [
                "translate",
                "prepare_candidate",
                "validate_candidate",
                "advance_node",
                "translate",
                "prepare_candidate",
                "validate_candidate",
                "advance_node",
            ]
        );
        let events = fs::read_to_string(temp.path().join("run-7/events.jsonl")).expect("events");
        assert_eq!(events.lines().count(), 8);
        assert!(temp.path().join("run-7/summary.json").exists());
        assert_eq!(summary.nodes[1].resolution, Resolution::Validated);
    }

    #[tokio::test]
    async fn violation_is_returned_after_summary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let scripted = scripted_collaborators();
        // Node 1 depends on a node that comes after it, which the loader
        // would reject; the driver trusts the list and hits the violation.
        let nodes = vec![dag_node(0, "A", &[]), dag_node(1, "B", &[2]), dag_node(2, "C", &[])];
        let mut ctx =
            RunContext::new("bob", nodes, Arc::new(Inbox::new())).with_run_id("run-bad");
        let log = RunLog::create(temp.path(), &ctx.run_id).expect("log");

        let err = run_pipeline(
            &scripted.collaborators(),
            &PipelineConfig::default(),
            &mut ctx,
            Some(log),
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(err.downcast_ref::<ContractViolation>().is_some());

        let summary: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(temp.path().join("run-bad/summary.json")).expect("summary"),
        )
        .expect("json");
        assert_eq!(summary["fully_verified"], false);
        assert!(summary["error"].as_str().expect("error").contains("not an earlier node"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn failed_log_append_still_writes_summary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let scripted = scripted_collaborators();
        let mut ctx =
            RunContext::new("carol", linear_dag(1), Arc::new(Inbox::new())).with_run_id("run-full");
        let mut log = RunLog::create(temp.path(), &ctx.run_id).expect("log");
        log.redirect_events(
            fs::OpenOptions::new()
                .write(true)
                .open("/dev/full")
                .expect("open /dev/full"),
        );

        let mut seen = 0;
        let err = run_pipeline(
            &scripted.collaborators(),
            &PipelineConfig::default(),
            &mut ctx,
            Some(log),
            |_| seen += 1,
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("append"));
        assert_eq!(seen, 0);

        let summary: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(temp.path().join("run-full/summary.json")).expect("summary"),
        )
        .expect("json");
        assert_eq!(summary["event_count"], 1);
        assert!(summary["error"].as_str().expect("error").contains("append"));
    }

    #[tokio::test]
    async fn inbox_slot_is_released_when_run_ends() {
        let scripted = scripted_collaborators();
        let inbox = Arc::new(Inbox::new());
        let mut ctx = RunContext::new("dave", linear_dag(1), Arc::clone(&inbox));
        let key = ctx.inbox_key();

        let mut open_during_run = false;
        run_pipeline(
            &scripted.collaborators(),
            &PipelineConfig::default(),
            &mut ctx,
            None,
            |_| open_during_run |= inbox.contains(&key),
        )
        .await
        .expect("run");
        assert!(open_during_run);
        assert!(!inbox.contains(&key));
    }
}
