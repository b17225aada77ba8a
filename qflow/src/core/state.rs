//! Typed shared state passed through every task of a run.
//!
//! Each field is part of the contract between tasks: the Driver owns the node
//! cursor fields, the translate/refine steps own `translations`, the validation
//! steps own `candidate_for_validation` and `validation_passed`. Accessors that
//! a task depends on return [`ContractViolation`] when the field was never
//! populated, which aborts the run.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::types::{DagNode, Resolution};

/// A task read a state field that no earlier task populated.
///
/// This is an integration error, not an expected remote failure: it is never
/// retried and terminates the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("contract violation in `{task}`: state field `{field}` {detail}")]
pub struct ContractViolation {
    pub task: String,
    pub field: &'static str,
    pub detail: String,
}

impl ContractViolation {
    pub fn missing(task: &str, field: &'static str) -> Self {
        Self {
            task: task.to_string(),
            field,
            detail: "is not set".to_string(),
        }
    }

    pub fn invalid(task: &str, field: &'static str, detail: impl Into<String>) -> Self {
        Self {
            task: task.to_string(),
            field,
            detail: detail.into(),
        }
    }
}

/// Final record for one node, written to run summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    pub index: usize,
    pub source: String,
    pub translation: Option<String>,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    /// The translation DAG, already in dependency order.
    pub nodes: Vec<DagNode>,
    /// Index of the node being processed. Advanced by index, never popped.
    pub cursor: Option<usize>,
    pub current_target_node: Option<DagNode>,
    pub referenced_nodes: Vec<DagNode>,
    /// Translations of `referenced_nodes`, same order.
    pub referenced_translations: Vec<String>,
    /// Translated value per node, append-only in node order.
    pub translations: Vec<String>,
    pub resolutions: BTreeMap<usize, Resolution>,
    pub candidate_for_validation: Option<String>,
    /// Translation `candidate_for_validation` was prepared from.
    pub attempted_translation: Option<String>,
    pub validation_passed: Option<bool>,
    pub last_diagnostic: Option<String>,
    pub human_reply: Option<String>,
    pub human_confirmed: bool,
    pub review_rounds: u32,
    /// Names still waiting for an example lookup; consumed from the front.
    pub lookup_queue: VecDeque<String>,
    pub examples: BTreeMap<String, Value>,
}

impl PipelineState {
    /// Create the state for a run over `nodes`, queueing every distinct
    /// symbol (first occurrence order) for example lookup.
    pub fn new(nodes: Vec<DagNode>) -> Self {
        let mut seen = BTreeSet::new();
        let lookup_queue = nodes
            .iter()
            .flat_map(|node| node.symbols.iter())
            .filter(|symbol| seen.insert(symbol.as_str()))
            .cloned()
            .collect();
        Self {
            nodes,
            lookup_queue,
            ..Self::default()
        }
    }

    /// Point the state at node `index`: current node, its dependency records
    /// and their recorded translations. Per-node validation fields are reset.
    pub fn select_node(&mut self, task: &str, index: usize) -> Result<(), ContractViolation> {
        let node = self
            .nodes
            .get(index)
            .cloned()
            .ok_or_else(|| {
                ContractViolation::invalid(
                    task,
                    "current_target_node",
                    format!("index {index} is outside the {} known nodes", self.nodes.len()),
                )
            })?;

        let mut referenced_nodes = Vec::with_capacity(node.depends_on.len());
        let mut referenced_translations = Vec::with_capacity(node.depends_on.len());
        for &dep in &node.depends_on {
            let dep_node = self.nodes.get(dep).filter(|_| dep < index).ok_or_else(|| {
                ContractViolation::invalid(
                    task,
                    "referenced_nodes",
                    format!("node {index} depends on {dep}, which is not an earlier node"),
                )
            })?;
            let translation = self.translations.get(dep).ok_or_else(|| {
                ContractViolation::invalid(
                    task,
                    "translations",
                    format!("dependency {dep} of node {index} has no recorded translation"),
                )
            })?;
            referenced_nodes.push(dep_node.clone());
            referenced_translations.push(translation.clone());
        }

        self.cursor = Some(index);
        self.current_target_node = Some(node);
        self.referenced_nodes = referenced_nodes;
        self.referenced_translations = referenced_translations;
        self.reset_node_fields();
        Ok(())
    }

    pub fn reset_node_fields(&mut self) {
        self.candidate_for_validation = None;
        self.attempted_translation = None;
        self.validation_passed = None;
        self.last_diagnostic = None;
        self.human_reply = None;
        self.human_confirmed = false;
        self.review_rounds = 0;
    }

    pub fn require_current_node(&self, task: &str) -> Result<&DagNode, ContractViolation> {
        self.current_target_node
            .as_ref()
            .ok_or_else(|| ContractViolation::missing(task, "current_target_node"))
    }

    /// Translation recorded for the current node, if any.
    pub fn current_translation(&self) -> Option<&str> {
        let index = self.current_target_node.as_ref()?.index;
        self.translations.get(index).map(String::as_str)
    }

    /// Record (or replace) the translation of the current node.
    ///
    /// Only the newest slot may be replaced; earlier nodes are frozen.
    pub fn record_translation(
        &mut self,
        task: &str,
        value: impl Into<String>,
    ) -> Result<(), ContractViolation> {
        let index = self.require_current_node(task)?.index;
        let len = self.translations.len();
        if index == len {
            self.translations.push(value.into());
        } else if index + 1 == len {
            self.translations[index] = value.into();
        } else {
            return Err(ContractViolation::invalid(
                task,
                "translations",
                format!("cannot record node {index} when {len} translations exist"),
            ));
        }
        Ok(())
    }

    pub fn resolve_current(&mut self, task: &str, resolution: Resolution) -> Result<(), ContractViolation> {
        let index = self.require_current_node(task)?.index;
        self.resolutions.insert(index, resolution);
        Ok(())
    }

    /// Remove up to `max` names from the front of the lookup queue.
    pub fn take_lookup_batch(&mut self, max: usize) -> Vec<String> {
        let count = max.min(self.lookup_queue.len());
        self.lookup_queue.drain(..count).collect()
    }

    pub fn node_summaries(&self) -> Vec<NodeSummary> {
        self.nodes
            .iter()
            .map(|node| NodeSummary {
                index: node.index,
                source: node.source.clone(),
                translation: self.translations.get(node.index).cloned(),
                resolution: self
                    .resolutions
                    .get(&node.index)
                    .copied()
                    .unwrap_or(Resolution::Unverified),
            })
            .collect()
    }

    /// True when every node ended validated or confirmed.
    pub fn fully_verified(&self) -> bool {
        self.node_summaries()
            .iter()
            .all(|summary| summary.resolution != Resolution::Unverified)
    }
}
