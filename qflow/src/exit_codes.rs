//! Stable exit codes for qflow CLI commands.

/// Command succeeded; for `run`, every node was validated or confirmed.
pub const OK: i32 = 0;
/// Invalid config or node list, a failed collaborator setup, or a run that
/// ended on a contract violation.
pub const INVALID: i32 = 1;
/// `qflow run` finished but at least one node is unverified.
pub const UNVERIFIED: i32 = 2;
