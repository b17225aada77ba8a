//! Node list loading with schema + invariant validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::invariants::validate_dag;
use crate::core::types::DagNode;
use crate::io::collaborators::NodeSource;
use crate::io::process::run_command_async;

const NODES_SCHEMA: &str = include_str!("../../schemas/dag_nodes.schema.json");

/// Parse and validate a JSON node list.
pub fn parse_nodes(raw: &str) -> Result<Vec<DagNode>> {
    let value: Value = serde_json::from_str(raw).context("parse node list")?;
    validate_schema(&value)?;
    let nodes: Vec<DagNode> = serde_json::from_value(value).context("deserialize node list")?;
    let errors = validate_dag(&nodes);
    if !errors.is_empty() {
        return Err(anyhow!("node list invariants failed: {}", errors.join("; ")));
    }
    Ok(nodes)
}

/// Load a node list from disk.
pub fn load_nodes(path: &Path) -> Result<Vec<DagNode>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read nodes {}", path.display()))?;
    parse_nodes(&contents).with_context(|| format!("load nodes {}", path.display()))
}

fn validate_schema(nodes: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(NODES_SCHEMA).context("parse node schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(nodes) {
        let messages = compiled
            .iter_errors(nodes)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "node list schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

/// Raw input is already a JSON node list.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonNodeSource;

#[async_trait]
impl NodeSource for JsonNodeSource {
    async fn nodes(&self, raw: &str) -> Result<Vec<DagNode>> {
        parse_nodes(raw)
    }
}

/// Hands raw source to an external parser whose stdout is a JSON node list.
#[derive(Debug, Clone)]
pub struct CommandNodeSource {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandNodeSource {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            timeout,
            output_limit_bytes,
        }
    }
}

#[async_trait]
impl NodeSource for CommandNodeSource {
    #[instrument(skip_all, fields(source_bytes = raw.len()))]
    async fn nodes(&self, raw: &str) -> Result<Vec<DagNode>> {
        let output = run_command_async(
            self.argv.clone(),
            Some(raw.as_bytes().to_vec()),
            self.timeout,
            self.output_limit_bytes,
        )
        .await?;
        if !output.success() {
            return Err(anyhow!("node source failed: {}", output.diagnostic()));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "node source output exceeded the limit by {} bytes",
                output.stdout_truncated
            ));
        }
        let nodes = parse_nodes(&output.stdout_text())?;
        debug!(count = nodes.len(), "node list parsed");
        Ok(nodes)
    }
}
