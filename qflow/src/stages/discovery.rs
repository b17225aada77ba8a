//! Example discovery ahead of translation.
//!
//! Each iteration takes a batch of names from the front of `lookup_queue` and
//! fetches their examples concurrently, bounded by `lookup_concurrency`. All
//! lookups of a batch finish before the event is produced.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::{StreamExt, stream};
use tracing::{debug, warn};

use crate::core::types::Event;
use crate::engine::context::RunContext;
use crate::engine::task::{LeafTask, LoopTask, Task};
use crate::io::collaborators::ExampleLookup;
use crate::io::config::PipelineConfig;

pub const EXAMPLE_DISCOVERY: &str = "example_discovery";
pub const FETCH_EXAMPLES: &str = "fetch_examples";

/// Loop over `pending` queued names; skipped when the queue is empty.
pub fn discovery_loop(
    lookup: Arc<dyn ExampleLookup>,
    cfg: &PipelineConfig,
    pending: usize,
) -> Task {
    let batch_size = cfg.lookup_batch_size.max(1);
    let batches = pending.div_ceil(batch_size);
    let max_iterations = u32::try_from(batches + 1).unwrap_or(u32::MAX);
    LoopTask::new(
        EXAMPLE_DISCOVERY,
        max_iterations,
        vec![Task::leaf(FetchExamplesLeaf::new(
            lookup,
            batch_size,
            cfg.lookup_concurrency,
        ))],
    )
    .with_pre_check(|ctx| Ok(!ctx.state.lookup_queue.is_empty()))
    .into()
}

pub struct FetchExamplesLeaf {
    lookup: Arc<dyn ExampleLookup>,
    batch_size: usize,
    concurrency: usize,
}

impl FetchExamplesLeaf {
    pub fn new(lookup: Arc<dyn ExampleLookup>, batch_size: usize, concurrency: usize) -> Self {
        Self {
            lookup,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl LeafTask for FetchExamplesLeaf {
    fn name(&self) -> &str {
        FETCH_EXAMPLES
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Event> {
        let batch = ctx.state.take_lookup_batch(self.batch_size);
        if batch.is_empty() {
            return Ok(Event::succeeded(FETCH_EXAMPLES, "no names left to look up").escalate());
        }
        debug!(count = batch.len(), "fetching examples");

        let results: Vec<_> = stream::iter(batch)
            .map(|name| {
                let lookup = Arc::clone(&self.lookup);
                async move {
                    let result = lookup.example(&name).await;
                    (name, result)
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut fetched = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in results {
            match result {
                Ok(value) => {
                    ctx.state.examples.insert(name.clone(), value);
                    fetched.push(name);
                }
                Err(err) => {
                    warn!(name = %name, err = %err, "example lookup failed");
                    failures.push(format!("{name}: {err:#}"));
                }
            }
        }

        let mut text = format!("fetched examples for [{}]", fetched.join(", "));
        let event = if failures.is_empty() {
            Event::succeeded(FETCH_EXAMPLES, text)
        } else {
            text.push_str(&format!("; failed: {}", failures.join("; ")));
            Event::failed(FETCH_EXAMPLES, text)
        };
        if ctx.state.lookup_queue.is_empty() {
            return Ok(event.escalate());
        }
        Ok(event)
    }
}
