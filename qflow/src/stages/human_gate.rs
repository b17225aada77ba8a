//! Human review of a node the validation loop could not settle.
//!
//! The gate is skipped when validation already passed. Each round shows the
//! reviewer the last attempt, suspends until a reply lands in the run's inbox
//! slot after that review was shown, then either keeps the reviewed attempt (the confirm sentinel) or
//! validates the reply as the new translation.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::state::ContractViolation;
use crate::core::types::{Event, Resolution};
use crate::engine::context::RunContext;
use crate::engine::task::{LeafTask, LoopTask, Task};
use crate::io::collaborators::{CandidatePreparer, TranslationRequest, Validator};
use crate::io::config::PipelineConfig;
use crate::io::prompt::{ReviewInputs, prompts};
use crate::stages::validation::check_candidate;

pub const HUMAN_GATE: &str = "human_gate";
pub const REVIEW_CONTEXT: &str = "review_context";
pub const AWAIT_HUMAN: &str = "await_human";
pub const PREPARE_HUMAN_CANDIDATE: &str = "prepare_human_candidate";
pub const VALIDATE_HUMAN_CANDIDATE: &str = "validate_human_candidate";

pub fn human_gate(
    preparer: Arc<dyn CandidatePreparer>,
    validator: Arc<dyn Validator>,
    cfg: &PipelineConfig,
) -> Task {
    LoopTask::new(
        HUMAN_GATE,
        cfg.human_gate_max_iterations,
        vec![
            Task::leaf(ReviewContextLeaf::new(
                cfg.reply_prefix.clone(),
                cfg.confirm_sentinel.clone(),
            )),
            Task::leaf(AwaitHumanLeaf::new(cfg.confirm_sentinel.clone())),
            Task::leaf(PrepareHumanCandidateLeaf::new(preparer)),
            Task::leaf(ValidateHumanCandidateLeaf::new(validator)),
        ],
    )
    .with_pre_check(|ctx| Ok(ctx.state.validation_passed != Some(true)))
    .into()
}

/// Renders what the reviewer needs; the event text is the rendered review.
pub struct ReviewContextLeaf {
    reply_prefix: String,
    confirm_sentinel: String,
}

impl ReviewContextLeaf {
    pub fn new(reply_prefix: String, confirm_sentinel: String) -> Self {
        Self {
            reply_prefix,
            confirm_sentinel,
        }
    }
}

#[async_trait]
impl LeafTask for ReviewContextLeaf {
    fn name(&self) -> &str {
        REVIEW_CONTEXT
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Event> {
        let node = ctx.state.require_current_node(REVIEW_CONTEXT)?.clone();
        // Only replies written after this review is shown count for the round.
        ctx.inbox.open(&ctx.inbox_key());
        let state = &mut ctx.state;
        state.review_rounds += 1;
        let request = TranslationRequest::from_state(&node, state);
        let inputs = ReviewInputs {
            round: state.review_rounds,
            translation: state
                .attempted_translation
                .clone()
                .or_else(|| state.current_translation().map(str::to_owned)),
            candidate: state.candidate_for_validation.clone(),
            diagnostic: state.last_diagnostic.clone(),
            node: request.node,
            dependencies: request.dependencies,
            examples: request.examples,
            reply_prefix: self.reply_prefix.clone(),
            confirm_sentinel: self.confirm_sentinel.clone(),
        };
        match prompts().render_review(&inputs) {
            Ok(review) => Ok(Event::succeeded(REVIEW_CONTEXT, review)),
            Err(err) => {
                warn!(node = node.index, err = %err, "review rendering failed");
                Ok(Event::failed(
                    REVIEW_CONTEXT,
                    format!("rendering review of node {} failed: {err:#}", node.index),
                ))
            }
        }
    }
}

/// Suspends the run until its inbox slot holds a reply.
pub struct AwaitHumanLeaf {
    confirm_sentinel: String,
}

impl AwaitHumanLeaf {
    pub fn new(confirm_sentinel: String) -> Self {
        Self { confirm_sentinel }
    }
}

#[async_trait]
impl LeafTask for AwaitHumanLeaf {
    fn name(&self) -> &str {
        AWAIT_HUMAN
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Event> {
        let index = ctx.state.require_current_node(AWAIT_HUMAN)?.index;
        let key = ctx.inbox_key();
        info!(node = index, run_id = %key.run_id, user_id = %key.user_id, "waiting for human reply");
        let reply = loop {
            let reply = ctx.inbox.take(&key).await?;
            let reply = reply.trim();
            if !reply.is_empty() {
                break reply.to_string();
            }
        };
        ctx.state.human_confirmed = reply == self.confirm_sentinel;
        ctx.state.human_reply = Some(reply.clone());
        info!(node = index, confirmed = ctx.state.human_confirmed, "human replied");
        Ok(Event::succeeded(AWAIT_HUMAN, reply))
    }
}

/// Keeps the reviewed attempt on confirmation; otherwise the reply becomes
/// the node's translation verbatim and is prepared for validation.
pub struct PrepareHumanCandidateLeaf {
    preparer: Arc<dyn CandidatePreparer>,
}

impl PrepareHumanCandidateLeaf {
    pub fn new(preparer: Arc<dyn CandidatePreparer>) -> Self {
        Self { preparer }
    }
}

#[async_trait]
impl LeafTask for PrepareHumanCandidateLeaf {
    fn name(&self) -> &str {
        PREPARE_HUMAN_CANDIDATE
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Event> {
        let node = ctx
            .state
            .require_current_node(PREPARE_HUMAN_CANDIDATE)?
            .clone();
        let state = &mut ctx.state;
        let reply = state
            .human_reply
            .clone()
            .ok_or_else(|| ContractViolation::missing(PREPARE_HUMAN_CANDIDATE, "human_reply"))?;

        if state.human_confirmed {
            let kept = state
                .attempted_translation
                .clone()
                .or_else(|| state.current_translation().map(str::to_owned))
                .unwrap_or_default();
            state.record_translation(PREPARE_HUMAN_CANDIDATE, kept)?;
            return Ok(Event::succeeded(
                PREPARE_HUMAN_CANDIDATE,
                format!("keeping the reviewed translation of node {}", node.index),
            ));
        }

        state.record_translation(PREPARE_HUMAN_CANDIDATE, reply.clone())?;
        state.attempted_translation = Some(reply.clone());
        match self.preparer.prepare(&node, &reply).await {
            Ok(candidate) => {
                state.candidate_for_validation = Some(candidate.clone());
                Ok(Event::succeeded(PREPARE_HUMAN_CANDIDATE, candidate))
            }
            Err(err) => {
                warn!(node = node.index, err = %err, "preparer failed on human reply");
                let diagnostic = format!("preparing candidate failed: {err:#}");
                state.candidate_for_validation = None;
                state.last_diagnostic = Some(diagnostic.clone());
                Ok(Event::failed(PREPARE_HUMAN_CANDIDATE, diagnostic))
            }
        }
    }
}

/// Confirmation ends the gate without a remote call; a replacement must pass
/// the validator, otherwise the reviewer is asked again.
pub struct ValidateHumanCandidateLeaf {
    validator: Arc<dyn Validator>,
}

impl ValidateHumanCandidateLeaf {
    pub fn new(validator: Arc<dyn Validator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl LeafTask for ValidateHumanCandidateLeaf {
    fn name(&self) -> &str {
        VALIDATE_HUMAN_CANDIDATE
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Event> {
        let index = ctx
            .state
            .require_current_node(VALIDATE_HUMAN_CANDIDATE)?
            .index;
        if ctx.state.human_confirmed {
            ctx.state.validation_passed = Some(true);
            ctx.state
                .resolve_current(VALIDATE_HUMAN_CANDIDATE, Resolution::HumanConfirmed)?;
            return Ok(Event::succeeded(
                VALIDATE_HUMAN_CANDIDATE,
                format!("node {index} confirmed by reviewer"),
            )
            .escalate());
        }
        if ctx.state.candidate_for_validation.as_deref() == Some("") {
            ctx.state.validation_passed = Some(true);
            ctx.state
                .resolve_current(VALIDATE_HUMAN_CANDIDATE, Resolution::NotCheckable)?;
            return Ok(Event::succeeded(
                VALIDATE_HUMAN_CANDIDATE,
                format!("node {index} is not independently checkable"),
            )
            .escalate());
        }
        check_candidate(
            self.validator.as_ref(),
            ctx,
            VALIDATE_HUMAN_CANDIDATE,
            Resolution::HumanValidated,
        )
        .await
    }
}
