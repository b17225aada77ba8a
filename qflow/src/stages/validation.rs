//! Bounded prepare → validate → refine loop for the current node.
//!
//! Fields written: `candidate_for_validation`, `attempted_translation`,
//! `validation_passed`, `last_diagnostic`, the node's translation (refine) and
//! its resolution (on success).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::core::types::{Event, Resolution};
use crate::engine::context::RunContext;
use crate::engine::task::{LeafTask, LoopTask, Task};
use crate::io::collaborators::{
    CandidatePreparer, RefineRequest, Refiner, TranslationRequest, Validator, Verdict,
};

pub const VALIDATION_LOOP: &str = "validation_loop";
pub const PREPARE_CANDIDATE: &str = "prepare_candidate";
pub const VALIDATE_CANDIDATE: &str = "validate_candidate";
pub const REFINE_CANDIDATE: &str = "refine_candidate";

pub fn validation_loop(
    preparer: Arc<dyn CandidatePreparer>,
    validator: Arc<dyn Validator>,
    refiner: Arc<dyn Refiner>,
    max_iterations: u32,
) -> Task {
    LoopTask::new(
        VALIDATION_LOOP,
        max_iterations,
        vec![
            Task::leaf(PrepareCandidateLeaf::new(preparer)),
            Task::leaf(ValidateCandidateLeaf::new(validator)),
            Task::leaf(RefineCandidateLeaf::new(refiner)),
        ],
    )
    .into()
}

/// Adapts the node's translation into a validator candidate.
///
/// An empty candidate means the node cannot be checked on its own; it passes
/// and the loop stops.
pub struct PrepareCandidateLeaf {
    preparer: Arc<dyn CandidatePreparer>,
}

impl PrepareCandidateLeaf {
    pub fn new(preparer: Arc<dyn CandidatePreparer>) -> Self {
        Self { preparer }
    }
}

#[async_trait]
impl LeafTask for PrepareCandidateLeaf {
    fn name(&self) -> &str {
        PREPARE_CANDIDATE
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Event> {
        let node = ctx.state.require_current_node(PREPARE_CANDIDATE)?.clone();
        let state = &mut ctx.state;
        let Some(translation) = state.current_translation().map(str::to_owned) else {
            state.candidate_for_validation = None;
            state.validation_passed = Some(false);
            let diagnostic = format!("node {} has no translation to validate", node.index);
            state.last_diagnostic = Some(diagnostic.clone());
            return Ok(Event::failed(PREPARE_CANDIDATE, diagnostic));
        };

        match self.preparer.prepare(&node, &translation).await {
            Ok(candidate) if candidate.is_empty() => {
                state.candidate_for_validation = Some(candidate);
                state.attempted_translation = Some(translation);
                state.validation_passed = Some(true);
                state.resolve_current(PREPARE_CANDIDATE, Resolution::NotCheckable)?;
                debug!(node = node.index, "empty candidate, nothing to validate");
                Ok(Event::succeeded(
                    PREPARE_CANDIDATE,
                    format!("node {} is not independently checkable", node.index),
                )
                .escalate())
            }
            Ok(candidate) => {
                state.candidate_for_validation = Some(candidate.clone());
                state.attempted_translation = Some(translation);
                Ok(Event::succeeded(PREPARE_CANDIDATE, candidate))
            }
            Err(err) => {
                warn!(node = node.index, err = %err, "preparer failed");
                let diagnostic = format!("preparing candidate failed: {err:#}");
                state.candidate_for_validation = None;
                state.attempted_translation = Some(translation);
                state.validation_passed = Some(false);
                state.last_diagnostic = Some(diagnostic.clone());
                Ok(Event::failed(PREPARE_CANDIDATE, diagnostic))
            }
        }
    }
}

/// Sends the prepared candidate to the validator; success stops the loop.
pub struct ValidateCandidateLeaf {
    validator: Arc<dyn Validator>,
}

impl ValidateCandidateLeaf {
    pub fn new(validator: Arc<dyn Validator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl LeafTask for ValidateCandidateLeaf {
    fn name(&self) -> &str {
        VALIDATE_CANDIDATE
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Event> {
        check_candidate(
            self.validator.as_ref(),
            ctx,
            VALIDATE_CANDIDATE,
            Resolution::Validated,
        )
        .await
    }
}

/// Validate `candidate_for_validation`, recording the verdict.
///
/// Success resolves the node as `on_pass` and escalates. A missing candidate
/// (the preparer failed) is a failed event, not a violation.
pub(crate) async fn check_candidate(
    validator: &dyn Validator,
    ctx: &mut RunContext,
    task: &str,
    on_pass: Resolution,
) -> Result<Event> {
    let index = ctx.state.require_current_node(task)?.index;
    let Some(candidate) = ctx.state.candidate_for_validation.clone() else {
        ctx.state.validation_passed = Some(false);
        return Ok(Event::failed(
            task,
            format!("node {index} has no candidate to validate"),
        ));
    };

    let verdict = match validator.validate(&candidate).await {
        Ok(verdict) => verdict,
        Err(err) => {
            warn!(node = index, err = %err, "validator unavailable");
            Verdict::fail(format!("validator unavailable: {err:#}"))
        }
    };

    let state = &mut ctx.state;
    state.validation_passed = Some(verdict.passed);
    state.last_diagnostic = Some(verdict.diagnostic.clone());
    if verdict.passed {
        state.resolve_current(task, on_pass)?;
        info!(node = index, resolution = on_pass.as_str(), "candidate accepted");
        return Ok(Event::succeeded(task, verdict.diagnostic).escalate());
    }
    debug!(node = index, diagnostic = %verdict.diagnostic, "candidate rejected");
    Ok(Event::failed(task, verdict.diagnostic))
}

/// Asks the refiner for a revised translation given the failed attempt.
pub struct RefineCandidateLeaf {
    refiner: Arc<dyn Refiner>,
}

impl RefineCandidateLeaf {
    pub fn new(refiner: Arc<dyn Refiner>) -> Self {
        Self { refiner }
    }
}

#[async_trait]
impl LeafTask for RefineCandidateLeaf {
    fn name(&self) -> &str {
        REFINE_CANDIDATE
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Event> {
        let node = ctx.state.require_current_node(REFINE_CANDIDATE)?.clone();
        let request = RefineRequest {
            request: TranslationRequest::from_state(&node, &ctx.state),
            previous: ctx.state.current_translation().map(str::to_owned),
            candidate: ctx.state.candidate_for_validation.clone(),
            diagnostic: ctx.state.last_diagnostic.clone(),
        };
        match self.refiner.refine(&request).await {
            Ok(revised) => {
                ctx.state.record_translation(REFINE_CANDIDATE, revised.clone())?;
                Ok(Event::succeeded(REFINE_CANDIDATE, revised))
            }
            Err(err) => {
                warn!(node = node.index, err = %err, "refiner failed");
                Ok(Event::failed(
                    REFINE_CANDIDATE,
                    format!("refining node {} failed: {err:#}", node.index),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::ContractViolation;
    use crate::engine::inbox::Inbox;
    use crate::engine::task::run_to_end;
    use crate::io::collaborators::PassthroughPreparer;
    use crate::test_support::{ScriptedRefiner, ScriptedValidator, linear_dag};

    fn ctx_with_translation(translation: &str) -> RunContext {
        let mut ctx = RunContext::new("tester", linear_dag(1), Arc::new(Inbox::new()));
        ctx.state.select_node("test", 0).expect("select");
        ctx.state.record_translation("test", translation).expect("record");
        ctx
    }

    fn sub_loop(validator: &Arc<ScriptedValidator>, refiner: &Arc<ScriptedRefiner>) -> Task {
        validation_loop(
            Arc::new(PassthroughPreparer),
            validator.clone(),
            refiner.clone(),
            5,
        )
    }

    #[tokio::test]
    async fn success_on_attempt_k_runs_exactly_k_attempts() {
        let validator = Arc::new(ScriptedValidator::passing_on(3));
        let refiner = Arc::new(ScriptedRefiner::numbered("fix"));
        let mut ctx = ctx_with_translation("attempt-1");

        let events = run_to_end(&sub_loop(&validator, &refiner), &mut ctx)
            .await
            .expect("run");
        assert_eq!(validator.candidates(), ["attempt-1", "fix-1", "fix-2"]);
        assert_eq!(refiner.call_count(), 2);
        assert_eq!(ctx.state.validation_passed, Some(true));
        assert_eq!(ctx.state.resolutions[&0], Resolution::Validated);
        assert_eq!(ctx.state.translations, ["fix-2"]);
        assert!(events.iter().all(|event| !event.escalates()));
        assert_eq!(events.last().map(|e| e.author.as_str()), Some(VALIDATE_CANDIDATE));
    }

    #[tokio::test]
    async fn exhausting_cap_is_not_an_error() {
        let validator = Arc::new(ScriptedValidator::always_failing("bad query"));
        let refiner = Arc::new(ScriptedRefiner::numbered("fix"));
        let mut ctx = ctx_with_translation("attempt-1");

        let events = run_to_end(&sub_loop(&validator, &refiner), &mut ctx)
            .await
            .expect("run");
        assert_eq!(validator.candidates().len(), 5);
        assert_eq!(events.len(), 15);
        assert_eq!(ctx.state.validation_passed, Some(false));
        assert_eq!(ctx.state.candidate_for_validation.as_deref(), Some("fix-4"));
        assert_eq!(ctx.state.attempted_translation.as_deref(), Some("fix-4"));
        assert_eq!(ctx.state.last_diagnostic.as_deref(), Some("bad query"));
        assert!(!ctx.state.resolutions.contains_key(&0));
    }

    #[tokio::test]
    async fn empty_candidate_passes_without_validator_call() {
        let validator = Arc::new(ScriptedValidator::always_failing("unused"));
        let refiner = Arc::new(ScriptedRefiner::numbered("fix"));
        let mut ctx = ctx_with_translation("''");

        let events = run_to_end(&sub_loop(&validator, &refiner), &mut ctx)
            .await
            .expect("run");
        assert_eq!(events.len(), 1);
        assert!(validator.candidates().is_empty());
        assert_eq!(ctx.state.validation_passed, Some(true));
        assert_eq!(ctx.state.resolutions[&0], Resolution::NotCheckable);
    }

    #[tokio::test]
    async fn missing_translation_fails_prepare_and_refine_recovers() {
        let validator = Arc::new(ScriptedValidator::passing_on(1));
        let refiner = Arc::new(ScriptedRefiner::numbered("fix"));
        let mut ctx = RunContext::new("tester", linear_dag(1), Arc::new(Inbox::new()));
        ctx.state.select_node("test", 0).expect("select");

        let events = run_to_end(&sub_loop(&validator, &refiner), &mut ctx)
            .await
            .expect("run");
        assert!(events[0].is_failed());
        assert!(events[1].is_failed());
        assert_eq!(events[2].text, "fix-1");
        assert_eq!(validator.candidates(), ["fix-1"]);
        assert_eq!(ctx.state.validation_passed, Some(true));
    }

    #[tokio::test]
    async fn validator_transport_error_is_a_failed_verdict() {
        let validator = ScriptedValidator::unavailable("connection refused");
        let mut ctx = ctx_with_translation("up");
        ctx.state.candidate_for_validation = Some("up".to_string());

        let event = ValidateCandidateLeaf::new(Arc::new(validator))
            .run(&mut ctx)
            .await
            .expect("run");
        assert!(event.is_failed());
        assert!(event.text.contains("connection refused"));
        assert_eq!(ctx.state.validation_passed, Some(false));
    }

    #[tokio::test]
    async fn refine_sees_failed_candidate_and_diagnostic() {
        let refiner = Arc::new(ScriptedRefiner::numbered("fix"));
        let mut ctx = ctx_with_translation("up");
        ctx.state.candidate_for_validation = Some("up".to_string());
        ctx.state.last_diagnostic = Some("no data".to_string());

        RefineCandidateLeaf::new(refiner.clone())
            .run(&mut ctx)
            .await
            .expect("run");
        let request = refiner.requests().pop().expect("request");
        assert_eq!(request.previous.as_deref(), Some("up"));
        assert_eq!(request.diagnostic.as_deref(), Some("no data"));
    }

    #[tokio::test]
    async fn leaves_without_current_node_violate_contract() {
        let mut ctx = RunContext::new("tester", linear_dag(1), Arc::new(Inbox::new()));
        let err = PrepareCandidateLeaf::new(Arc::new(PassthroughPreparer))
            .run(&mut ctx)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ContractViolation>().is_some());
    }
}
