//! Structured JSON logging setup using tracing.
//!
//! Embedding applications usually install their own subscriber; these helpers
//! exist for standalone runners and tests.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a JSON subscriber. `RUST_LOG` takes precedence over `filter`.
///
/// Returns an error if the filter is invalid or a global subscriber is
/// already installed.
pub fn init_logging(filter: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(filter))?;

    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter_layer)
        .try_init()?;

    tracing::info!(filter = %filter, "Logging initialized");
    Ok(())
}

/// Initialize logging for tests (with simpler output).
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}
