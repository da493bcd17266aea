//! Subscriber setup for the `brood` binary.
//!
//! The subscriber is installed before the configuration is read, so that
//! messages emitted while loading it are not lost. Until then it runs at
//! `info`. Once the config is known, [`apply_level`] swaps in the configured
//! level, unless `--verbose` or `RUST_LOG` already decided the filter.

use tracing::warn;
use tracing_subscriber::{
    EnvFilter, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Level used until the configuration has been read.
pub const STARTUP_LEVEL: &str = "info";

/// Handle to a filter that still follows the configured level.
pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Filter directives for a plain level name.
pub fn level_directives(level: &str) -> String {
    format!("brood={level},brood_cli={level},warn")
}

/// Initial filter, and whether the configured level may replace it later.
pub fn initial_filter(verbose: bool, rust_log: Option<&str>) -> (EnvFilter, bool) {
    if verbose {
        return (EnvFilter::new("brood=debug,brood_cli=debug,info"), false);
    }
    match rust_log {
        Some(directives) if !directives.trim().is_empty() => (EnvFilter::new(directives), false),
        _ => (EnvFilter::new(level_directives(STARTUP_LEVEL)), true),
    }
}

/// Install the global subscriber.
///
/// Returns a handle when the filter should follow the configured level.
pub fn init(verbose: bool) -> Option<FilterHandle> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (filter, configurable) = initial_filter(verbose, rust_log.as_deref());
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    configurable.then_some(handle)
}

/// Switch a configurable filter to `level`.
pub fn apply_level(handle: Option<&FilterHandle>, level: &str) {
    let Some(handle) = handle else {
        return;
    };
    if let Err(e) = handle.reload(EnvFilter::new(level_directives(level))) {
        warn!(level, error = %e, "Failed to apply configured log level");
    }
}
