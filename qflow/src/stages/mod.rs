//! The translation pipeline assembled from task units.
//!
//! ```text
//! pipeline (sequence)
//! ├── example_discovery (loop, only with a lookup collaborator)
//! │   └── fetch_examples
//! └── translation_driver (loop, pre-check seeds node 0)
//!     ├── translate
//!     ├── validation_loop (loop)
//!     │   ├── prepare_candidate
//!     │   ├── validate_candidate
//!     │   └── refine_candidate
//!     ├── human_gate (loop, skipped once validation passed)
//!     │   ├── review_context
//!     │   ├── await_human
//!     │   ├── prepare_human_candidate
//!     │   └── validate_human_candidate
//!     └── advance_node
//! ```

use std::sync::Arc;

use crate::core::state::PipelineState;
use crate::engine::task::Task;
use crate::io::collaborators::{CandidatePreparer, ExampleLookup, Refiner, Translator, Validator};
use crate::io::config::PipelineConfig;

pub mod discovery;
pub mod driver;
pub mod human_gate;
pub mod translate;
pub mod validation;

pub const PIPELINE: &str = "pipeline";

/// The external collaborators one pipeline calls.
#[derive(Clone)]
pub struct Collaborators {
    pub translator: Arc<dyn Translator>,
    pub refiner: Arc<dyn Refiner>,
    pub preparer: Arc<dyn CandidatePreparer>,
    pub validator: Arc<dyn Validator>,
    pub lookup: Option<Arc<dyn ExampleLookup>>,
}

/// Build the task tree for a run whose initial state is `state`.
///
/// The discovery cap depends on how many names are queued, so the tree is
/// built per run.
pub fn build_pipeline(
    collaborators: &Collaborators,
    cfg: &PipelineConfig,
    state: &PipelineState,
) -> Task {
    let mut stages = Vec::with_capacity(2);
    if let Some(lookup) = &collaborators.lookup {
        stages.push(discovery::discovery_loop(
            Arc::clone(lookup),
            cfg,
            state.lookup_queue.len(),
        ));
    }
    stages.push(driver::driver_loop(collaborators, cfg));
    Task::sequence(PIPELINE, stages)
}
