//! Test-only helpers: deterministic nodes and scripted collaborators that
//! record every call.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use crate::core::state::ContractViolation;
use crate::core::types::{DagNode, Event};
use crate::engine::context::RunContext;
use crate::engine::task::{LeafTask, Task};
use crate::io::collaborators::{
    ExampleLookup, PassthroughPreparer, RefineRequest, Refiner, TranslationRequest, Translator,
    Validator, Verdict,
};
use crate::stages::Collaborators;
use crate::stages::human_gate::REVIEW_CONTEXT;

/// Create a node with the given dependencies and no symbols.
pub fn dag_node(index: usize, source: &str, depends_on: &[usize]) -> DagNode {
    DagNode {
        index,
        source: source.to_string(),
        depends_on: depends_on.to_vec(),
        symbols: Vec::new(),
    }
}

/// `n` nodes where each node depends on the one before it.
pub fn linear_dag(n: usize) -> Vec<DagNode> {
    (0..n)
        .map(|index| {
            let deps: Vec<usize> = index.checked_sub(1).into_iter().collect();
            dag_node(index, &format!("block {index}"), &deps)
        })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Shared record of which leaves ran, in order.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn record(&self, name: &str) {
        lock(&self.calls).push(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

enum LeafScript {
    /// Events in order; the last one repeats.
    Events(Vec<Event>),
    Violation,
}

/// Leaf that returns pre-scripted events and logs each run.
pub struct ScriptedLeaf {
    name: String,
    script: LeafScript,
    runs: AtomicUsize,
    log: CallLog,
}

impl ScriptedLeaf {
    pub fn new(name: &str, events: Vec<Event>, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            script: LeafScript::Events(events),
            runs: AtomicUsize::new(0),
            log: log.clone(),
        }
    }

    pub fn repeating(name: &str, event: Event, log: &CallLog) -> Self {
        Self::new(name, vec![event], log)
    }

    /// Fails with a contract violation on every run.
    pub fn violating(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            script: LeafScript::Violation,
            runs: AtomicUsize::new(0),
            log: log.clone(),
        }
    }
}

#[async_trait]
impl LeafTask for ScriptedLeaf {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &mut RunContext) -> Result<Event> {
        self.log.record(&self.name);
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            LeafScript::Events(events) => events
                .get(run)
                .or_else(|| events.last())
                .cloned()
                .ok_or_else(|| anyhow!("scripted leaf {} has no events", self.name)),
            LeafScript::Violation => {
                Err(ContractViolation::missing(&self.name, "current_target_node").into())
            }
        }
    }
}

enum TranslatorScript {
    Answers(Vec<String>),
    PerNode,
    Fail(String),
}

/// Translator returning scripted answers and recording requests.
pub struct ScriptedTranslator {
    script: TranslatorScript,
    requests: Mutex<Vec<TranslationRequest>>,
}

impl ScriptedTranslator {
    fn with_script(script: TranslatorScript) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers in order; the last one repeats.
    pub fn answering<S: Into<String>>(answers: impl IntoIterator<Item = S>) -> Self {
        Self::with_script(TranslatorScript::Answers(
            answers.into_iter().map(Into::into).collect(),
        ))
    }

    /// Answers `translated-<index>` for every node.
    pub fn per_node() -> Self {
        Self::with_script(TranslatorScript::PerNode)
    }

    pub fn failing(message: &str) -> Self {
        Self::with_script(TranslatorScript::Fail(message.to_string()))
    }

    pub fn requests(&self) -> Vec<TranslationRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, request: &TranslationRequest) -> Result<String> {
        let call = {
            let mut requests = lock(&self.requests);
            requests.push(request.clone());
            requests.len() - 1
        };
        match &self.script {
            TranslatorScript::Answers(answers) => answers
                .get(call)
                .or_else(|| answers.last())
                .cloned()
                .ok_or_else(|| anyhow!("no scripted translation")),
            TranslatorScript::PerNode => Ok(format!("translated-{}", request.node.index)),
            TranslatorScript::Fail(message) => Err(anyhow!("{message}")),
        }
    }
}

/// Refiner answering `<prefix>-<n>` for its n-th call (1-based).
pub struct ScriptedRefiner {
    prefix: String,
    requests: Mutex<Vec<RefineRequest>>,
}

impl ScriptedRefiner {
    pub fn numbered(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RefineRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl Refiner for ScriptedRefiner {
    async fn refine(&self, request: &RefineRequest) -> Result<String> {
        let mut requests = lock(&self.requests);
        requests.push(request.clone());
        Ok(format!("{}-{}", self.prefix, requests.len()))
    }
}

type VerdictFn = Box<dyn Fn(usize, &str) -> Result<Verdict> + Send + Sync>;

/// Validator deciding from the call number (1-based) and candidate.
pub struct ScriptedValidator {
    decide: VerdictFn,
    candidates: Mutex<Vec<String>>,
}

impl ScriptedValidator {
    pub fn from_fn<F>(decide: F) -> Self
    where
        F: Fn(usize, &str) -> Result<Verdict> + Send + Sync + 'static,
    {
        Self {
            decide: Box::new(decide),
            candidates: Mutex::new(Vec::new()),
        }
    }

    pub fn always_passing() -> Self {
        Self::from_fn(|_, _| Ok(Verdict::pass("ok")))
    }

    /// Rejects calls before the `k`-th, accepts from then on.
    pub fn passing_on(k: usize) -> Self {
        Self::from_fn(move |call, _| {
            Ok(if call >= k {
                Verdict::pass("ok")
            } else {
                Verdict::fail(format!("attempt {call} rejected"))
            })
        })
    }

    pub fn always_failing(diagnostic: &str) -> Self {
        let diagnostic = diagnostic.to_string();
        Self::from_fn(move |_, _| Ok(Verdict::fail(diagnostic.clone())))
    }

    /// Accepts exactly the candidates `accept` returns true for.
    pub fn accepting<F>(accept: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::from_fn(move |_, candidate| {
            Ok(if accept(candidate) {
                Verdict::pass("ok")
            } else {
                Verdict::fail(format!("rejected {candidate}"))
            })
        })
    }

    /// Transport failure on every call.
    pub fn unavailable(message: &str) -> Self {
        let message = message.to_string();
        Self::from_fn(move |_, _| Err(anyhow!("{message}")))
    }

    pub fn candidates(&self) -> Vec<String> {
        lock(&self.candidates).clone()
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    async fn validate(&self, candidate: &str) -> Result<Verdict> {
        let call = {
            let mut candidates = lock(&self.candidates);
            candidates.push(candidate.to_string());
            candidates.len()
        };
        (self.decide)(call, candidate)
    }
}

/// Lookup over a fixed table; unknown names fail. Tracks peak concurrency.
pub struct ScriptedLookup {
    table: BTreeMap<String, Value>,
    delay: Duration,
    names: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedLookup {
    pub fn new<S: Into<String>>(entries: impl IntoIterator<Item = (S, Value)>) -> Self {
        Self {
            table: entries
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
            delay: Duration::from_millis(5),
            names: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.names).clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExampleLookup for ScriptedLookup {
    async fn example(&self, name: &str) -> Result<Value> {
        lock(&self.names).push(name.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.table
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no example for {name}"))
    }
}

/// Scripted collaborators kept as concrete types so tests can inspect them.
pub struct ScriptedSet {
    pub translator: Arc<ScriptedTranslator>,
    pub refiner: Arc<ScriptedRefiner>,
    pub validator: Arc<ScriptedValidator>,
    pub lookup: Option<Arc<ScriptedLookup>>,
}

impl ScriptedSet {
    pub fn with_validator(mut self, validator: ScriptedValidator) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    pub fn with_translator(mut self, translator: ScriptedTranslator) -> Self {
        self.translator = Arc::new(translator);
        self
    }

    pub fn with_lookup(mut self, lookup: ScriptedLookup) -> Self {
        self.lookup = Some(Arc::new(lookup));
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            translator: self.translator.clone(),
            refiner: self.refiner.clone(),
            preparer: Arc::new(PassthroughPreparer),
            validator: self.validator.clone(),
            lookup: self
                .lookup
                .clone()
                .map(|lookup| lookup as Arc<dyn ExampleLookup>),
        }
    }
}

/// Per-node translator, numbered refiner, always-passing validator, no lookup.
pub fn scripted_collaborators() -> ScriptedSet {
    ScriptedSet {
        translator: Arc::new(ScriptedTranslator::per_node()),
        refiner: Arc::new(ScriptedRefiner::numbered("refined")),
        validator: Arc::new(ScriptedValidator::always_passing()),
        lookup: None,
    }
}

/// Run `task` to the end, answering each human review with the next reply.
///
/// Fails when a review arrives after the replies ran out.
pub async fn run_with_replies(
    task: &Task,
    ctx: &mut RunContext,
    replies: &[&str],
) -> Result<Vec<Event>> {
    let inbox = Arc::clone(&ctx.inbox);
    let key = ctx.inbox_key();
    let mut replies = replies.iter();
    let mut events = task.execute(ctx);
    let mut collected = Vec::new();
    while let Some(item) = events.next().await {
        let event = item?;
        if event.author == REVIEW_CONTEXT {
            let reply = replies
                .next()
                .ok_or_else(|| anyhow!("review requested but no reply is scripted"))?;
            if !inbox.write(&key, *reply) {
                return Err(anyhow!("review shown but the inbox slot is not open"));
            }
        }
        collected.push(event);
    }
    Ok(collected)
}
