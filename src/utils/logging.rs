//! Diagnostic logging setup for the binary.
//!
//! Library code only emits `tracing` events; the subscriber is installed once
//! by the CLI and writes to stderr so stdout stays clean for replies.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directives read first; `RUST_LOG` is the fallback.
pub const LOG_ENV: &str = "STREAMCHAT_LOG";

/// Resolve the filter from `STREAMCHAT_LOG`, then `RUST_LOG`, then the default.
pub fn build_filter(verbose: bool) -> EnvFilter {
    let default_level = if verbose { "debug" } else { "warn" };
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(verbose))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
