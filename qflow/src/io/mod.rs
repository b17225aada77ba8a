//! I/O adapters: configuration, collaborator backends, node loading, run logs.

pub mod collaborators;
pub mod command;
pub mod config;
pub mod nodes;
pub mod process;
pub mod prompt;
pub mod run_log;
