//! Log output for the CLI.
//!
//! Everything goes to stderr so the traced program owns stdout. `RUST_LOG`
//! overrides the filter chosen from the verbosity flags.

use crate::config::CliConfig;
use tracing_subscriber::EnvFilter;

/// Build the log filter for a configuration
#[must_use]
pub fn filter_for(config: &CliConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.verbosity.default_filter()))
}

/// Install the global subscriber. Returns `false` if one is already set.
pub fn init(config: &CliConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(config))
        .with_writer(std::io::stderr)
        .with_ansi(config.color.should_color())
        .with_target(false)
        .try_init()
        .is_ok()
}
