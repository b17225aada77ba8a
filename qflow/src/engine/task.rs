//! Task units and their composition.
//!
//! A [`Task`] is a closed set of variants: a leaf wrapping one unit of work, a
//! sequence running children in order, and a bounded loop. Every variant
//! produces a lazy stream of [`Event`]s. An `Err` item is a contract violation;
//! it is forwarded and the stream ends.

use std::sync::Arc;

use anyhow::Result;
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, trace};

use crate::core::types::{Control, Event};
use crate::engine::context::RunContext;

pub type EventStream<'a> = BoxStream<'a, Result<Event>>;

/// Run-time check evaluated once before a loop's first iteration.
///
/// Returning `false` skips the loop entirely. It may seed state the loop body
/// depends on.
pub type PreCheck = Arc<dyn Fn(&mut RunContext) -> Result<bool> + Send + Sync>;

/// One unit of externally visible work.
///
/// Implementations perform their side effects, then return exactly one event.
/// Expected failures of collaborators must be converted into a failed event;
/// only contract violations are returned as `Err`.
#[async_trait]
pub trait LeafTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut RunContext) -> Result<Event>;
}

pub struct LoopTask {
    pub name: String,
    pub children: Vec<Task>,
    pub max_iterations: u32,
    pub pre_check: Option<PreCheck>,
}

impl LoopTask {
    pub fn new(name: impl Into<String>, max_iterations: u32, children: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            children,
            max_iterations,
            pre_check: None,
        }
    }

    pub fn with_pre_check<F>(mut self, pre_check: F) -> Self
    where
        F: Fn(&mut RunContext) -> Result<bool> + Send + Sync + 'static,
    {
        self.pre_check = Some(Arc::new(pre_check));
        self
    }

    fn execute<'a>(&'a self, ctx: &'a mut RunContext) -> EventStream<'a> {
        Box::pin(stream! {
            if let Some(pre_check) = &self.pre_check {
                match (pre_check.as_ref())(&mut *ctx) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(task = %self.name, "pre-check declined, loop skipped");
                        return;
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }

            let mut iterations = 0u32;
            while iterations < self.max_iterations {
                trace!(task = %self.name, iteration = iterations + 1, "loop iteration");
                for child in &self.children {
                    let mut events = child.execute(&mut *ctx);
                    while let Some(item) = events.next().await {
                        match item {
                            Ok(mut event) if event.escalates() => {
                                debug!(
                                    task = %self.name,
                                    author = %event.author,
                                    iteration = iterations + 1,
                                    "escalation stops loop"
                                );
                                event.control = Control::Continue;
                                yield Ok(event);
                                return;
                            }
                            Ok(event) => {
                                yield Ok(event);
                            }
                            Err(err) => {
                                yield Err(err);
                                return;
                            }
                        }
                    }
                }
                iterations += 1;
            }
            debug!(task = %self.name, max_iterations = self.max_iterations, "loop cap reached");
        })
    }
}

pub enum Task {
    Leaf(Arc<dyn LeafTask>),
    Sequence { name: String, children: Vec<Task> },
    Loop(LoopTask),
}

impl Task {
    pub fn leaf<L: LeafTask + 'static>(leaf: L) -> Self {
        Task::Leaf(Arc::new(leaf))
    }

    pub fn sequence(name: impl Into<String>, children: Vec<Task>) -> Self {
        Task::Sequence {
            name: name.into(),
            children,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Task::Leaf(leaf) => leaf.name(),
            Task::Sequence { name, .. } => name,
            Task::Loop(task) => &task.name,
        }
    }

    /// Execute the task against `ctx`, yielding events depth-first,
    /// left-to-right.
    pub fn execute<'a>(&'a self, ctx: &'a mut RunContext) -> EventStream<'a> {
        match self {
            Task::Leaf(leaf) => run_leaf(leaf.as_ref(), ctx),
            Task::Sequence { children, .. } => run_sequence(children, ctx),
            Task::Loop(task) => task.execute(ctx),
        }
    }
}

impl From<LoopTask> for Task {
    fn from(task: LoopTask) -> Self {
        Task::Loop(task)
    }
}

fn run_leaf<'a>(leaf: &'a dyn LeafTask, ctx: &'a mut RunContext) -> EventStream<'a> {
    Box::pin(stream! {
        debug!(task = leaf.name(), "running leaf");
        yield leaf.run(ctx).await;
    })
}

/// Escalation is passed through untouched; only loops act on it.
fn run_sequence<'a>(children: &'a [Task], ctx: &'a mut RunContext) -> EventStream<'a> {
    Box::pin(stream! {
        for child in children {
            let mut events = child.execute(&mut *ctx);
            while let Some(item) = events.next().await {
                let failed = item.is_err();
                yield item;
                if failed {
                    return;
                }
            }
        }
    })
}

/// Drive `task` to completion and collect every event.
pub async fn run_to_end(task: &Task, ctx: &mut RunContext) -> Result<Vec<Event>> {
    let mut events = task.execute(ctx);
    let mut collected = Vec::new();
    while let Some(item) = events.next().await {
        collected.push(item?);
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::ContractViolation;
    use crate::core::types::Outcome;
    use crate::engine::inbox::Inbox;
    use crate::test_support::{CallLog, ScriptedLeaf};

    fn ctx() -> RunContext {
        RunContext::new("tester", Vec::new(), Arc::new(Inbox::new()))
    }

    #[tokio::test]
    async fn loop_without_escalation_runs_children_cap_times_in_order() {
        let log = CallLog::default();
        let task: Task = LoopTask::new(
            "outer",
            3,
            vec![
                Task::leaf(ScriptedLeaf::repeating("a", Event::succeeded("a", "ok"), &log)),
                Task::leaf(ScriptedLeaf::repeating("b", Event::succeeded("b", "ok"), &log)),
            ],
        )
        .into();

        let events = run_to_end(&task, &mut ctx()).await.expect("run");
        assert_eq!(events.len(), 6);
        assert_eq!(log.calls(), ["a", "b", "a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn escalation_forwards_cleared_event_and_stops() {
        let log = CallLog::default();
        let task: Task = LoopTask::new(
            "outer",
            5,
            vec![
                Task::leaf(ScriptedLeaf::new(
                    "check",
                    vec![
                        Event::succeeded("check", "not yet"),
                        Event::succeeded("check", "done").escalate(),
                    ],
                    &log,
                )),
                Task::leaf(ScriptedLeaf::repeating("after", Event::succeeded("after", "ok"), &log)),
            ],
        )
        .into();

        let events = run_to_end(&task, &mut ctx()).await.expect("run");
        assert_eq!(log.calls(), ["check", "after", "check"]);
        let last = events.last().expect("last event");
        assert_eq!(last.text, "done");
        assert_eq!(last.control, Control::Continue);
        assert!(events.iter().all(|event| !event.escalates()));
    }

    #[tokio::test]
    async fn inner_escalation_does_not_stop_grandparent() {
        let log = CallLog::default();
        let inner = LoopTask::new(
            "inner",
            10,
            vec![Task::leaf(ScriptedLeaf::repeating(
                "stop_inner",
                Event::succeeded("stop_inner", "stop").escalate(),
                &log,
            ))],
        );
        let middle = Task::sequence("middle", vec![inner.into()]);
        let outer: Task = LoopTask::new(
            "outer",
            3,
            vec![
                middle,
                Task::leaf(ScriptedLeaf::repeating("tail", Event::succeeded("tail", "ok"), &log)),
            ],
        )
        .into();

        run_to_end(&outer, &mut ctx()).await.expect("run");
        assert_eq!(
            log.calls(),
            ["stop_inner", "tail", "stop_inner", "tail", "stop_inner", "tail"]
        );
    }

    #[tokio::test]
    async fn sequence_passes_escalation_through_to_parent_loop() {
        let log = CallLog::default();
        let outer: Task = LoopTask::new(
            "outer",
            4,
            vec![
                Task::sequence(
                    "seq",
                    vec![Task::leaf(ScriptedLeaf::repeating(
                        "esc",
                        Event::succeeded("esc", "stop").escalate(),
                        &log,
                    ))],
                ),
                Task::leaf(ScriptedLeaf::repeating("never", Event::succeeded("never", "ok"), &log)),
            ],
        )
        .into();

        let mut events = outer.execute(&mut ctx()).collect::<Vec<_>>().await;
        assert_eq!(events.len(), 1);
        let event = events.remove(0).expect("event");
        assert_eq!(event.control, Control::Continue);
        assert_eq!(log.calls(), ["esc"]);
    }

    #[tokio::test]
    async fn sequence_alone_keeps_escalate_flag() {
        let log = CallLog::default();
        let seq = Task::sequence(
            "seq",
            vec![
                Task::leaf(ScriptedLeaf::repeating("x", Event::succeeded("x", "s").escalate(), &log)),
                Task::leaf(ScriptedLeaf::repeating("y", Event::failed("y", "f"), &log)),
            ],
        );
        let events = run_to_end(&seq, &mut ctx()).await.expect("run");
        assert!(events[0].escalates());
        assert_eq!(events[1].outcome, Outcome::Failed);
        assert_eq!(log.calls(), ["x", "y"]);
    }

    #[tokio::test]
    async fn pre_check_false_skips_loop() {
        let log = CallLog::default();
        let task: Task = LoopTask::new(
            "gated",
            3,
            vec![Task::leaf(ScriptedLeaf::repeating("body", Event::succeeded("body", "ok"), &log))],
        )
        .with_pre_check(|_| Ok(false))
        .into();

        let events = run_to_end(&task, &mut ctx()).await.expect("run");
        assert!(events.is_empty());
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn contract_violation_ends_the_stream() {
        let log = CallLog::default();
        let task: Task = LoopTask::new(
            "outer",
            3,
            vec![
                Task::leaf(ScriptedLeaf::violating("broken", &log)),
                Task::leaf(ScriptedLeaf::repeating("after", Event::succeeded("after", "ok"), &log)),
            ],
        )
        .into();

        let err = run_to_end(&task, &mut ctx()).await.unwrap_err();
        assert!(err.downcast_ref::<ContractViolation>().is_some());
        assert_eq!(log.calls(), ["broken"]);
    }
}
