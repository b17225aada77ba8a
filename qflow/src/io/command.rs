//! Collaborators backed by external commands.
//!
//! Each adapter writes its request to the command's stdin and reads the
//! answer from stdout. Commands run on the blocking pool with a timeout and
//! bounded output.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::core::types::DagNode;
use crate::io::collaborators::{
    CandidatePreparer, ExampleLookup, PassthroughPreparer, RefineRequest, Refiner,
    TranslationRequest, Translator, Validator, Verdict,
};
use crate::io::config::{CommandConfig, PipelineConfig};
use crate::io::process::{CommandOutput, run_command_async};
use crate::io::prompt::prompts;
use crate::stages::Collaborators;

/// One configured external command.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandRunner {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            timeout,
            output_limit_bytes,
        }
    }

    /// `None` when the command is not configured.
    pub fn from_config(command: &CommandConfig, cfg: &PipelineConfig) -> Option<Self> {
        command.is_configured().then(|| {
            Self::new(
                command.command.clone(),
                cfg.command_timeout(),
                cfg.output_limit_bytes,
            )
        })
    }

    pub fn with_args<S: Into<String>>(&self, extra: impl IntoIterator<Item = S>) -> Self {
        let mut runner = self.clone();
        runner.argv.extend(extra.into_iter().map(Into::into));
        runner
    }

    async fn run(&self, stdin: Vec<u8>) -> Result<CommandOutput> {
        run_command_async(
            self.argv.clone(),
            Some(stdin),
            self.timeout,
            self.output_limit_bytes,
        )
        .await
    }

    /// Run and return trimmed stdout, failing on a non-zero exit.
    async fn run_for_text(&self, label: &str, stdin: Vec<u8>) -> Result<String> {
        let output = self.run(stdin).await?;
        if !output.success() {
            return Err(anyhow!("{label} failed: {}", output.diagnostic()));
        }
        Ok(output.stdout_text())
    }
}

/// Sends the rendered translation prompt; stdout is the translation.
pub struct CommandTranslator {
    runner: CommandRunner,
}

impl CommandTranslator {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Translator for CommandTranslator {
    #[instrument(skip_all, fields(node = request.node.index))]
    async fn translate(&self, request: &TranslationRequest) -> Result<String> {
        let prompt = prompts().render_translate(request)?;
        let translation = self.runner.run_for_text("translator", prompt.into_bytes()).await?;
        debug!(bytes = translation.len(), "translation received");
        Ok(translation)
    }
}

/// Sends the rendered refine prompt; stdout is the revised translation.
pub struct CommandRefiner {
    runner: CommandRunner,
}

impl CommandRefiner {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Refiner for CommandRefiner {
    #[instrument(skip_all, fields(node = request.request.node.index))]
    async fn refine(&self, request: &RefineRequest) -> Result<String> {
        let prompt = prompts().render_refine(request)?;
        self.runner.run_for_text("refiner", prompt.into_bytes()).await
    }
}

/// Sends `{"node": .., "translation": ..}` as JSON; stdout is the candidate.
pub struct CommandPreparer {
    runner: CommandRunner,
}

impl CommandPreparer {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl CandidatePreparer for CommandPreparer {
    #[instrument(skip_all, fields(node = node.index))]
    async fn prepare(&self, node: &DagNode, translation: &str) -> Result<String> {
        let payload = serde_json::to_vec(&json!({
            "node": node,
            "translation": translation,
        }))?;
        let candidate = self.runner.run_for_text("preparer", payload).await?;
        PassthroughPreparer.prepare(node, &candidate).await
    }
}

/// Sends the candidate on stdin; exit status 0 means the query ran.
pub struct CommandValidator {
    runner: CommandRunner,
}

impl CommandValidator {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Validator for CommandValidator {
    #[instrument(skip_all, fields(candidate_bytes = candidate.len()))]
    async fn validate(&self, candidate: &str) -> Result<Verdict> {
        let output = self.runner.run(candidate.as_bytes().to_vec()).await?;
        if output.success() {
            let detail = output.stdout_text();
            let detail = if detail.is_empty() {
                "validator accepted candidate".to_string()
            } else {
                detail
            };
            return Ok(Verdict::pass(detail));
        }
        let diagnostic = output.diagnostic();
        warn!(%diagnostic, "validator rejected candidate");
        Ok(Verdict::fail(diagnostic))
    }
}

/// Passes the name as the final argument; stdout is parsed as JSON when it
/// can be, otherwise kept as a string.
pub struct CommandLookup {
    runner: CommandRunner,
}

impl CommandLookup {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ExampleLookup for CommandLookup {
    #[instrument(skip_all, fields(name = name))]
    async fn example(&self, name: &str) -> Result<Value> {
        let text = self
            .runner
            .with_args([name])
            .run_for_text("lookup", Vec::new())
            .await?;
        if text.is_empty() {
            return Err(anyhow!("lookup returned no example for {name}"));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// Build every collaborator from the configured commands.
pub fn command_collaborators(cfg: &PipelineConfig) -> Result<Collaborators> {
    let translator = CommandRunner::from_config(&cfg.translator, cfg)
        .ok_or_else(|| anyhow!("translator.command is not configured"))?;
    let validator = CommandRunner::from_config(&cfg.validator, cfg)
        .ok_or_else(|| anyhow!("validator.command is not configured"))?;
    let refiner = CommandRunner::from_config(&cfg.refiner, cfg).unwrap_or_else(|| translator.clone());

    let preparer: Arc<dyn CandidatePreparer> = match CommandRunner::from_config(&cfg.preparer, cfg) {
        Some(runner) => Arc::new(CommandPreparer::new(runner)),
        None => Arc::new(PassthroughPreparer),
    };
    let lookup = CommandRunner::from_config(&cfg.lookup, cfg)
        .map(|runner| Arc::new(CommandLookup::new(runner)) as Arc<dyn ExampleLookup>);

    Ok(Collaborators {
        translator: Arc::new(CommandTranslator::new(translator)),
        refiner: Arc::new(CommandRefiner::new(refiner)),
        preparer,
        validator: Arc::new(CommandValidator::new(validator)),
        lookup,
    })
}
