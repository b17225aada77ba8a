//! Composition engine: tasks, loops, the run context and the human inbox.

pub mod context;
pub mod inbox;
pub mod task;
