//! Pipeline configuration stored as TOML (default `qflow.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Pipeline configuration (TOML).
///
/// Meant to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Safety bound on Driver iterations; far above any realistic node count.
    pub driver_max_iterations: u32,

    /// Attempts of the validate/refine loop per node.
    pub validation_max_iterations: u32,

    /// Rounds of human review per node before it is left unverified.
    pub human_gate_max_iterations: u32,

    /// Human reply meaning "keep the current candidate".
    pub confirm_sentinel: String,

    /// Prefix that routes a chat message into the inbox instead of starting a run.
    pub reply_prefix: String,

    /// Concurrent example lookups inside one discovery step.
    pub lookup_concurrency: usize,

    /// Names taken from the lookup queue per discovery step.
    pub lookup_batch_size: usize,

    /// Wall-clock limit for one collaborator command.
    pub command_timeout_secs: u64,

    /// Truncate collaborator stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    pub translator: CommandConfig,
    /// Falls back to `translator` when empty.
    pub refiner: CommandConfig,
    /// Candidates are the trimmed translation when empty.
    pub preparer: CommandConfig,
    pub validator: CommandConfig,
    pub node_source: CommandConfig,
    pub lookup: CommandConfig,
}

/// Argv of an external collaborator command. Empty means "not configured".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    pub command: Vec<String>,
}

impl CommandConfig {
    pub fn new<S: Into<String>>(argv: impl IntoIterator<Item = S>) -> Self {
        Self {
            command: argv.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.command
            .first()
            .is_some_and(|program| !program.trim().is_empty())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            driver_max_iterations: 10_000,
            validation_max_iterations: 5,
            human_gate_max_iterations: 3,
            confirm_sentinel: "confirmed".to_string(),
            reply_prefix: "#HITL ".to_string(),
            lookup_concurrency: 8,
            lookup_batch_size: 16,
            command_timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
            translator: CommandConfig::new(["qflow-translate"]),
            refiner: CommandConfig::default(),
            preparer: CommandConfig::default(),
            validator: CommandConfig::new(["qflow-validate"]),
            node_source: CommandConfig::default(),
            lookup: CommandConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.driver_max_iterations == 0 {
            return Err(anyhow!("driver_max_iterations must be > 0"));
        }
        if self.validation_max_iterations == 0 {
            return Err(anyhow!("validation_max_iterations must be > 0"));
        }
        if self.human_gate_max_iterations == 0 {
            return Err(anyhow!("human_gate_max_iterations must be > 0"));
        }
        if self.confirm_sentinel.trim().is_empty() {
            return Err(anyhow!("confirm_sentinel must be non-empty"));
        }
        if self.reply_prefix.is_empty() {
            return Err(anyhow!("reply_prefix must be non-empty"));
        }
        if self.lookup_concurrency == 0 {
            return Err(anyhow!("lookup_concurrency must be > 0"));
        }
        if self.lookup_batch_size == 0 {
            return Err(anyhow!("lookup_batch_size must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if !self.translator.is_configured() {
            return Err(anyhow!("translator.command must be a non-empty array"));
        }
        if !self.validator.is_configured() {
            return Err(anyhow!("validator.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("qflow.toml");
        let cfg = PipelineConfig {
            validation_max_iterations: 2,
            lookup: CommandConfig::new(["fetch-example", "--cluster", "prod"]),
            ..PipelineConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("qflow.toml");
        fs::write(&path, "human_gate_max_iterations = 1\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.human_gate_max_iterations, 1);
        assert_eq!(cfg.confirm_sentinel, "confirmed");
    }

    #[test]
    fn rejects_zero_caps() {
        let cfg = PipelineConfig {
            validation_max_iterations: 0,
            ..PipelineConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("validation_max_iterations"));
    }

    #[test]
    fn rejects_missing_validator_command() {
        let cfg = PipelineConfig {
            validator: CommandConfig::default(),
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
