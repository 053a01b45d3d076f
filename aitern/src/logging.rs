//! Tracing setup for the CLI.
//!
//! Tracing is diagnostics on stderr, filtered by `RUST_LOG`. Session records
//! in the record directory are the product output and are written regardless.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `RUST_LOG` wins; otherwise `default_level`.
///
/// ```bash
/// RUST_LOG=aitern=debug aitern explore --tests test_calc
/// ```
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
