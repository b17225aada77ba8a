//! Contracts of the external collaborators the pipeline calls.
//!
//! Leaves only see these traits. Backends live in [`crate::io::command`];
//! tests use the scripted implementations in `test_support`.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::state::PipelineState;
use crate::core::types::DagNode;

/// A dependency of the node being translated, with its recorded translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyContext {
    pub index: usize,
    pub source: String,
    pub translation: String,
}

/// Everything a translator sees for one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationRequest {
    pub node: DagNode,
    pub dependencies: Vec<DependencyContext>,
    pub examples: BTreeMap<String, Value>,
}

impl TranslationRequest {
    /// Build the request for `node` from the dependency fields of `state`.
    pub fn from_state(node: &DagNode, state: &PipelineState) -> Self {
        let dependencies = state
            .referenced_nodes
            .iter()
            .zip(&state.referenced_translations)
            .map(|(dep, translation)| DependencyContext {
                index: dep.index,
                source: dep.source.clone(),
                translation: translation.clone(),
            })
            .collect();
        let examples = node
            .symbols
            .iter()
            .filter_map(|symbol| {
                state
                    .examples
                    .get(symbol)
                    .map(|value| (symbol.clone(), value.clone()))
            })
            .collect();
        Self {
            node: node.clone(),
            dependencies,
            examples,
        }
    }
}

/// A failed attempt and why it failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefineRequest {
    pub request: TranslationRequest,
    pub previous: Option<String>,
    pub candidate: Option<String>,
    pub diagnostic: Option<String>,
}

/// Outcome of one remote validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    pub diagnostic: String,
}

impl Verdict {
    pub fn pass(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: true,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn fail(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostic: diagnostic.into(),
        }
    }
}

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, request: &TranslationRequest) -> Result<String>;
}

#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(&self, request: &RefineRequest) -> Result<String>;
}

/// Turns a translation into something the validator can run.
///
/// An empty candidate means the translation cannot be checked on its own.
#[async_trait]
pub trait CandidatePreparer: Send + Sync {
    async fn prepare(&self, node: &DagNode, translation: &str) -> Result<String>;
}

/// Remote check of a candidate. Must be idempotent and side-effect free.
///
/// `Err` is a transport failure; it is treated like a failed verdict.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, candidate: &str) -> Result<Verdict>;
}

/// Read-only lookup of an example record for a name (table, metric).
#[async_trait]
pub trait ExampleLookup: Send + Sync {
    async fn example(&self, name: &str) -> Result<Value>;
}

/// Turns raw input into an ordered node list.
#[async_trait]
pub trait NodeSource: Send + Sync {
    async fn nodes(&self, raw: &str) -> Result<Vec<DagNode>>;
}

/// Uses the translation itself as the candidate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughPreparer;

#[async_trait]
impl CandidatePreparer for PassthroughPreparer {
    async fn prepare(&self, _node: &DagNode, translation: &str) -> Result<String> {
        Ok(strip_empty_quotes(translation.trim()).to_string())
    }
}

/// `''` and `""` are how translators spell "nothing to run".
fn strip_empty_quotes(candidate: &str) -> &str {
    match candidate {
        "''" | "\"\"" => "",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dag_node, linear_dag};

    #[tokio::test]
    async fn passthrough_treats_quoted_empty_as_empty() {
        let node = dag_node(0, "A", &[]);
        let preparer = PassthroughPreparer;
        assert_eq!(preparer.prepare(&node, "  ''  ").await.expect("prepare"), "");
        assert_eq!(preparer.prepare(&node, "\"\"").await.expect("prepare"), "");
        assert_eq!(preparer.prepare(&node, " up ").await.expect("prepare"), "up");
    }

    #[test]
    fn request_pairs_dependencies_with_translations() {
        let mut nodes = linear_dag(2);
        nodes[1].symbols = vec!["KubeEvents".to_string(), "Missing".to_string()];
        let mut state = PipelineState::new(nodes);
        state
            .examples
            .insert("KubeEvents".to_string(), serde_json::json!({"Reason": "x"}));
        state.select_node("test", 0).expect("select");
        state.record_translation("test", "count(up)").expect("record");
        state.select_node("test", 1).expect("select");

        let node = state.current_target_node.clone().expect("node");
        let request = TranslationRequest::from_state(&node, &state);
        assert_eq!(request.dependencies.len(), 1);
        assert_eq!(request.dependencies[0].translation, "count(up)");
        assert_eq!(request.examples.len(), 1);
        assert!(request.examples.contains_key("KubeEvents"));
    }
}
