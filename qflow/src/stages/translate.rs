//! First translation of the current node.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::core::types::Event;
use crate::engine::context::RunContext;
use crate::engine::task::LeafTask;
use crate::io::collaborators::{TranslationRequest, Translator};

pub const TRANSLATE: &str = "translate";

/// Calls the translator with the node, its dependency translations and any
/// discovered examples; records the result as the node's translation.
pub struct TranslateLeaf {
    translator: Arc<dyn Translator>,
}

impl TranslateLeaf {
    pub fn new(translator: Arc<dyn Translator>) -> Self {
        Self { translator }
    }
}

#[async_trait]
impl LeafTask for TranslateLeaf {
    fn name(&self) -> &str {
        TRANSLATE
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<Event> {
        let node = ctx.state.require_current_node(TRANSLATE)?.clone();
        let request = TranslationRequest::from_state(&node, &ctx.state);
        match self.translator.translate(&request).await {
            Ok(translation) => {
                ctx.state.record_translation(TRANSLATE, translation.clone())?;
                info!(node = node.index, "node translated");
                Ok(Event::succeeded(TRANSLATE, translation))
            }
            Err(err) => {
                warn!(node = node.index, err = %err, "translator failed");
                Ok(Event::failed(
                    TRANSLATE,
                    format!("translation of node {} failed: {err:#}", node.index),
                ))
            }
        }
    }
}
