//! Shared application state for the HTTP server.

use std::path::PathBuf;
use std::sync::Arc;

use qflow::engine::inbox::Inbox;
use qflow::io::collaborators::NodeSource;
use qflow::io::config::PipelineConfig;
use qflow::stages::Collaborators;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Reply slots of every run this server started, keyed by session and user.
    pub inbox: Arc<Inbox>,
    pub config: Arc<PipelineConfig>,
    pub collaborators: Collaborators,
    /// Turns a submitted message into the node list of a new run.
    pub node_source: Arc<dyn NodeSource>,
    /// Run logs are written under this directory when set.
    pub out_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        config: PipelineConfig,
        collaborators: Collaborators,
        node_source: Arc<dyn NodeSource>,
        out_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            inbox: Arc::new(Inbox::new()),
            config: Arc::new(config),
            collaborators,
            node_source,
            out_dir,
        }
    }
}
