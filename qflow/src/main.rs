//! qflow command line.
//!
//! `qflow run` translates a node list block by block. Human review prompts
//! are printed as events; replies are read from stdin, one per line and one
//! line per review, with or without the reply prefix.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use qflow::core::types::DagNode;
use qflow::engine::context::RunContext;
use qflow::engine::inbox::{Inbox, InboxKey, route_reply};
use qflow::exit_codes;
use qflow::io::collaborators::NodeSource;
use qflow::io::command::command_collaborators;
use qflow::io::config::{PipelineConfig, load_config, write_config};
use qflow::io::nodes::{CommandNodeSource, load_nodes};
use qflow::io::run_log::RunLog;
use qflow::run::run_pipeline;

#[derive(Parser)]
#[command(
    name = "qflow",
    version,
    about = "Dependency-ordered query translation with validation and human review"
)]
struct Cli {
    /// Pipeline config (TOML). Defaults apply when the file is missing.
    #[arg(long, global = true, default_value = "qflow.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Check a node list against the schema and ordering rules.
    Check {
        #[arg(long)]
        nodes: PathBuf,
    },
    /// Translate a node list, or a raw source query via the node source command.
    Run {
        #[arg(long, conflicts_with = "source", required_unless_present = "source")]
        nodes: Option<PathBuf>,
        #[arg(long)]
        source: Option<PathBuf>,
        #[arg(long, default_value = "cli")]
        user: String,
        /// Run id; doubles as the inbox session. Random when omitted.
        #[arg(long)]
        session: Option<String>,
        /// Directory for run logs.
        #[arg(long, default_value = ".qflow/runs")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    qflow::logging::init();
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Check { nodes } => cmd_check(&nodes),
        Command::Run {
            nodes,
            source,
            user,
            session,
            out,
        } => {
            let cfg = load_config(&cli.config)?;
            let nodes = match (nodes, source) {
                (Some(path), _) => load_nodes(&path)?,
                (None, Some(path)) => nodes_from_source(&cfg, &path).await?,
                (None, None) => return Err(anyhow!("either --nodes or --source is required")),
            };
            cmd_run(&cfg, nodes, user, session, &out).await
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if !force && path.exists() {
        println!("{} already exists", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &PipelineConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_check(path: &Path) -> Result<i32> {
    let nodes = load_nodes(path)?;
    println!("{} nodes ok", nodes.len());
    Ok(exit_codes::OK)
}

async fn nodes_from_source(cfg: &PipelineConfig, path: &Path) -> Result<Vec<DagNode>> {
    if !cfg.node_source.is_configured() {
        return Err(anyhow!("node_source.command must be configured to use --source"));
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let source = CommandNodeSource::new(
        cfg.node_source.command.clone(),
        cfg.command_timeout(),
        cfg.output_limit_bytes,
    );
    source.nodes(&raw).await
}

async fn cmd_run(
    cfg: &PipelineConfig,
    nodes: Vec<DagNode>,
    user: String,
    session: Option<String>,
    out: &Path,
) -> Result<i32> {
    let collaborators = command_collaborators(cfg)?;
    let inbox = Arc::new(Inbox::new());
    let mut ctx = RunContext::new(user, nodes, Arc::clone(&inbox));
    if let Some(session) = session {
        ctx = ctx.with_run_id(session);
    }
    let log = RunLog::create(out, &ctx.run_id)?;
    let replies = tokio::spawn(forward_replies(
        inbox,
        ctx.inbox_key(),
        cfg.reply_prefix.clone(),
    ));

    let result = run_pipeline(&collaborators, cfg, &mut ctx, Some(log), |event| {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("unprintable event from {}: {err}", event.author),
        }
    })
    .await;
    replies.abort();

    let summary = result?;
    println!("{}", serde_json::to_string_pretty(&summary.nodes)?);
    Ok(if summary.fully_verified {
        exit_codes::OK
    } else {
        exit_codes::UNVERIFIED
    })
}

/// Hand stdin lines to the run's gate, one line per review.
///
/// Lines stay buffered until a gate is parked on the slot, so replies piped in
/// ahead of time are neither overwritten nor discarded as stale.
async fn forward_replies(inbox: Arc<Inbox>, key: InboxKey, prefix: String) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let reply = route_reply(&line, &prefix).unwrap_or_else(|| line.trim());
        if reply.is_empty() {
            continue;
        }
        inbox.wait_for_waiter(&key).await?;
        debug!(bytes = reply.len(), "forwarding stdin reply");
        if !inbox.write(&key, reply) {
            break;
        }
    }
    debug!("stdin closed");
    Ok(())
}
