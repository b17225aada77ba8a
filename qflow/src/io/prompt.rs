//! Text rendering for collaborator prompts and human review.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;

use crate::core::types::DagNode;
use crate::io::collaborators::{DependencyContext, RefineRequest, TranslationRequest};

const TRANSLATE_TEMPLATE: &str = include_str!("prompts/translate.md");
const REFINE_TEMPLATE: &str = include_str!("prompts/refine.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");

/// What a human sees before answering the gate.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewInputs {
    pub round: u32,
    pub node: DagNode,
    pub dependencies: Vec<DependencyContext>,
    pub translation: Option<String>,
    pub candidate: Option<String>,
    pub diagnostic: Option<String>,
    pub examples: BTreeMap<String, Value>,
    pub reply_prefix: String,
    pub confirm_sentinel: String,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("translate", TRANSLATE_TEMPLATE)
            .expect("translate template should be valid");
        env.add_template("refine", REFINE_TEMPLATE)
            .expect("refine template should be valid");
        env.add_template("review", REVIEW_TEMPLATE)
            .expect("review template should be valid");
        Self { env }
    }

    pub fn render_translate(&self, request: &TranslationRequest) -> Result<String> {
        let template = self.env.get_template("translate")?;
        let rendered = template.render(context! {
            node => &request.node,
            dependencies => &request.dependencies,
            examples => &request.examples,
        })?;
        Ok(rendered)
    }

    pub fn render_refine(&self, refine: &RefineRequest) -> Result<String> {
        let template = self.env.get_template("refine")?;
        let rendered = template.render(context! {
            request => &refine.request,
            previous => refine.previous.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            candidate => refine.candidate.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            diagnostic => refine.diagnostic.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    pub fn render_review(&self, inputs: &ReviewInputs) -> Result<String> {
        let template = self.env.get_template("review")?;
        Ok(template.render(inputs)?)
    }
}

/// Shared engine; templates are compiled once.
pub fn prompts() -> &'static PromptEngine {
    static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);
    &ENGINE
}
