//! Workflow engine for dependency-ordered query translation.
//!
//! A run walks a DAG of query blocks in index order. Each block is translated,
//! checked against a remote validator with a bounded refine loop, and handed
//! to a human reviewer when the loop cannot settle it.
//!
//! - **[`core`]**: Pure, deterministic types and the typed run state. No I/O.
//! - **[`engine`]**: Task units (leaf, sequence, loop), the escalation rules
//!   that connect them, and the human reply inbox.
//! - **[`io`]**: Collaborator contracts and their command-backed
//!   implementations, config, prompts and run logs.
//! - **[`stages`]**: The pipeline built from task units.
//!
//! [`run`] drives one pipeline run for the CLI and the HTTP surface.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
pub mod stages;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
