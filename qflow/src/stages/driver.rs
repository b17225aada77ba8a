//! Outer loop walking the node list in index order.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::core::types::{Event, Resolution};
use crate::engine::context::RunContext;
use crate::engine::task::{LeafTask, LoopTask, Task};
use crate::io::config::PipelineConfig;
use crate::stages::Collaborators;
use crate::stages::human_gate::human_gate;
use crate::stages::translate::TranslateLeaf;
use crate::stages::validation::validation_loop;

pub const TRANSLATION_DRIVER: &str = "translation_driver";
pub const ADVANCE_NODE: &str = "advance_node";

/// One iteration per node: translate, validate, ask a human if needed,
/// advance. The iteration cap is only a safety bound; `advance_node` ends the
/// loop after the last node.
pub fn driver_loop(collaborators: &Collaborators, cfg: &PipelineConfig) -> Task {
    LoopTask::new(
        TRANSLATION_DRIVER,
        cfg.driver_max_iterations,
        vec![
            Task::leaf(TranslateLeaf::new(collaborators.translator.clone())),
            validation_loop(
                collaborators.preparer.clone(),
                collaborators.validator.clone(),
                collaborators.refiner.clone(),
                cfg.validation_max_iterations,
            ),
            human_gate(
                collaborators.preparer.clone(),
                collaborators.validator.clone(),
                cfg,
            ),
            Task::leaf(AdvanceNodeLeaf),
        ],
    )
    .with_pre_check(seed_first_node)
    .into()
}

/// Point the state at node 0; an empty node list skips the driver.
fn seed_first_node(ctx: &mut RunContext) -> Result<bool> {
    if ctx.state.nodes.is_empty() {
        info!("no nodes to translate");
        return Ok(false);
    }
    ctx.state.select_node(TRANSLATION_DRIVER, 0)?;
    Ok(true)
}

/// Closes the current node and moves to the next one.
///
/// A node that never produced a translation is recorded as empty so later
/// dependents always find a value. Escalates after the last node.
pub struct AdvanceNodeLeaf;

#[async_trait]
impl LeafTask for AdvanceNodeLeaf {
    fn name(&self) -> &str {
        ADVANCE_NODE
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Event> {
        let state = &mut ctx.state;
        let index = state.require_current_node(ADVANCE_NODE)?.index;
        if state.translations.len() == index {
            state.record_translation(ADVANCE_NODE, "")?;
        }
        let resolution = *state
            .resolutions
            .entry(index)
            .or_insert(Resolution::Unverified);
        info!(node = index, resolution = resolution.as_str(), "node done");

        let next = index + 1;
        if next >= state.nodes.len() {
            debug!(nodes = state.nodes.len(), "all nodes processed");
            return Ok(Event::succeeded(
                ADVANCE_NODE,
                format!(
                    "node {index} {}; all {} nodes processed",
                    resolution.as_str(),
                    state.nodes.len()
                ),
            )
            .escalate());
        }
        state.select_node(ADVANCE_NODE, next)?;
        Ok(Event::succeeded(
            ADVANCE_NODE,
            format!("node {index} {}; moving to node {next}", resolution.as_str()),
        ))
    }
}
