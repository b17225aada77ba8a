//! Execution context owned by one pipeline run.

use std::sync::Arc;

use uuid::Uuid;

use crate::core::state::PipelineState;
use crate::core::types::DagNode;
use crate::engine::inbox::{Inbox, InboxKey};

/// Everything a task may read or write during a run.
///
/// Owned by the caller of the top-level task and passed by `&mut` through the
/// composite tree; tasks never run concurrently within one context.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub user_id: String,
    pub state: PipelineState,
    pub inbox: Arc<Inbox>,
}

impl RunContext {
    pub fn new(user_id: impl Into<String>, nodes: Vec<DagNode>, inbox: Arc<Inbox>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            state: PipelineState::new(nodes),
            inbox,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// The inbox slot this run reads human replies from.
    pub fn inbox_key(&self) -> InboxKey {
        InboxKey::new(self.run_id.clone(), self.user_id.clone())
    }
}
