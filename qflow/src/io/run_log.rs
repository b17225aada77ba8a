//! Per-run logs under `<out>/<run_id>/`.
//!
//! `events.jsonl` gets one line per event as it is yielded; `summary.json` is
//! written once the run ends.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::state::{NodeSummary, PipelineState};
use crate::core::types::Event;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub user_id: String,
    pub event_count: usize,
    pub fully_verified: bool,
    /// Set when the run ended on an error instead of running to completion.
    pub error: Option<String>,
    pub nodes: Vec<NodeSummary>,
}

impl RunSummary {
    pub fn from_state(
        run_id: &str,
        user_id: &str,
        event_count: usize,
        state: &PipelineState,
        error: Option<String>,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            user_id: user_id.to_string(),
            event_count,
            fully_verified: error.is_none() && state.fully_verified(),
            error,
            nodes: state.node_summaries(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub events_path: PathBuf,
    pub summary_path: PathBuf,
}

impl RunPaths {
    pub fn new(root: &Path, run_id: &str) -> Self {
        let dir = root.join(run_id);
        Self {
            events_path: dir.join("events.jsonl"),
            summary_path: dir.join("summary.json"),
            dir,
        }
    }
}

pub struct RunLog {
    paths: RunPaths,
    events: File,
    written: usize,
}

impl RunLog {
    pub fn create(root: &Path, run_id: &str) -> Result<Self> {
        let paths = RunPaths::new(root, run_id);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create run dir {}", paths.dir.display()))?;
        let events = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.events_path)
            .with_context(|| format!("open {}", paths.events_path.display()))?;
        Ok(Self {
            paths,
            events,
            written: 0,
        })
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    pub fn event_count(&self) -> usize {
        self.written
    }

    #[cfg(test)]
    pub(crate) fn redirect_events(&mut self, events: File) {
        self.events = events;
    }

    pub fn append(&mut self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        self.events
            .write_all(line.as_bytes())
            .with_context(|| format!("append {}", self.paths.events_path.display()))?;
        self.written += 1;
        Ok(())
    }

    pub fn finish(mut self, summary: &RunSummary) -> Result<RunPaths> {
        self.events.flush().context("flush events")?;
        let mut buf = serde_json::to_string_pretty(summary)?;
        buf.push('\n');
        fs::write(&self.paths.summary_path, buf)
            .with_context(|| format!("write {}", self.paths.summary_path.display()))?;
        Ok(self.paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Resolution;
    use crate::test_support::linear_dag;

    #[test]
    fn run_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "run-1");
        assert!(paths.dir.ends_with("run-1"));
        assert!(paths.events_path.ends_with("events.jsonl"));
        assert!(paths.summary_path.ends_with("summary.json"));
    }

    #[test]
    fn writes_events_and_summary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut log = RunLog::create(temp.path(), "run-1").expect("create");
        log.append(&Event::succeeded("translate", "up")).expect("append");
        log.append(&Event::failed("validate", "bad").escalate())
            .expect("append");
        assert_eq!(log.event_count(), 2);

        let mut state = PipelineState::new(linear_dag(1));
        state.select_node("test", 0).expect("select");
        state.record_translation("test", "up").expect("record");
        state
            .resolve_current("test", Resolution::Validated)
            .expect("resolve");
        let summary = RunSummary::from_state("run-1", "alice", 2, &state, None);
        let paths = log.finish(&summary).expect("finish");

        let events = fs::read_to_string(&paths.events_path).expect("read events");
        let lines: Vec<_> = events.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: Event = serde_json::from_str(lines[1]).expect("event json");
        assert!(second.escalates());

        let summary: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.summary_path).expect("read"))
                .expect("summary json");
        assert_eq!(summary["fully_verified"], true);
        assert_eq!(summary["nodes"][0]["translation"], "up");
    }

    #[test]
    fn error_marks_run_unverified() {
        let state = PipelineState::new(Vec::new());
        let summary =
            RunSummary::from_state("r", "u", 0, &state, Some("contract violation".into()));
        assert!(!summary.fully_verified);
    }
}
