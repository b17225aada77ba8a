//! Diagnostics for the `qflow` binary.
//!
//! stdout belongs to the run: one JSON event per line, then the node summary,
//! so scripts can pipe it. Everything from `tracing` goes to stderr instead.
//! The persisted record of a run is `io::run_log`, which does not depend on
//! the filter chosen here.

use std::io::IsTerminal;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset. Gate waits and collaborator
/// failures log at `info`/`warn`, so they show up without configuration.
pub const DEFAULT_FILTER: &str = "warn,qflow=info";

/// Install the stderr subscriber.
///
/// ```bash
/// RUST_LOG=qflow::engine=debug qflow run --nodes nodes.json
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .compact(),
        )
        .init();
}
