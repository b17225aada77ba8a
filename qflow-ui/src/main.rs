//! qflow HTTP server: start translation runs and answer their human reviews.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use qflow::io::collaborators::NodeSource;
use qflow::io::command::command_collaborators;
use qflow::io::config::load_config;
use qflow::io::nodes::{CommandNodeSource, JsonNodeSource};
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "qflow-ui")]
#[command(about = "HTTP surface for qflow translation runs")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Pipeline config (TOML)
    #[arg(long, default_value = "qflow.toml")]
    config: PathBuf,

    /// Directory for run logs; none are written when omitted
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("qflow_ui=info".parse()?)
                .add_directive("qflow=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = load_config(&args.config)?;
    let collaborators = command_collaborators(&config)?;
    let node_source: Arc<dyn NodeSource> = if config.node_source.is_configured() {
        info!(command = ?config.node_source.command, "using node source command");
        Arc::new(CommandNodeSource::new(
            config.node_source.command.clone(),
            config.command_timeout(),
            config.output_limit_bytes,
        ))
    } else {
        info!("no node source command, messages must be JSON node lists");
        Arc::new(JsonNodeSource)
    };

    let state = AppState::new(config, collaborators, node_source, args.out_dir);
    let app = routes::app(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
