//! Shared deterministic types for the pipeline core.
//!
//! These types define stable contracts between tasks and their observers. They
//! do not depend on external state or I/O.

use serde::{Deserialize, Serialize};

/// One unit of the dependency-ordered translation graph.
///
/// `depends_on` lists indices of earlier nodes; a node may only depend on
/// nodes with a smaller index (checked at load time, see
/// [`crate::core::invariants::validate_dag`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNode {
    pub index: usize,
    pub source: String,
    #[serde(default)]
    pub depends_on: Vec<usize>,
    /// Names referenced by the node (tables, metrics) whose example records
    /// may be fetched before translation starts.
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// Whether the work behind an [`Event`] succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
}

/// Loop-control tag carried on every event.
///
/// `Escalate` asks the nearest enclosing loop to stop after forwarding the
/// event. The loop rewrites it to `Continue` before forwarding, so the signal
/// never travels past one loop level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    #[default]
    Continue,
    Escalate,
}

/// The unit produced by every task execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub author: String,
    pub text: String,
    pub outcome: Outcome,
    #[serde(default)]
    pub control: Control,
}

impl Event {
    pub fn succeeded(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
            outcome: Outcome::Succeeded,
            control: Control::Continue,
        }
    }

    pub fn failed(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
            outcome: Outcome::Failed,
            control: Control::Continue,
        }
    }

    /// Mark this event as a request to stop the enclosing loop.
    pub fn escalate(mut self) -> Self {
        self.control = Control::Escalate;
        self
    }

    pub fn escalates(&self) -> bool {
        self.control == Control::Escalate
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

/// How the final translation of a node was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The remote validator accepted the candidate.
    Validated,
    /// The candidate was empty: nothing to check remotely.
    NotCheckable,
    /// A human confirmed the existing candidate.
    HumanConfirmed,
    /// A human supplied a replacement that the validator accepted.
    HumanValidated,
    /// Every bounded attempt ran out without acceptance.
    Unverified,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Validated => "validated",
            Resolution::NotCheckable => "not_checkable",
            Resolution::HumanConfirmed => "human_confirmed",
            Resolution::HumanValidated => "human_validated",
            Resolution::Unverified => "unverified",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_snake_case_tags() {
        let event = Event::failed("validate_candidate", "boom").escalate();
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["control"], "escalate");
    }

    #[test]
    fn node_defaults_missing_lists() {
        let node: DagNode =
            serde_json::from_str(r#"{"index":0,"source":"T | take 1"}"#).expect("parse");
        assert!(node.depends_on.is_empty());
        assert!(node.symbols.is_empty());
    }
}
