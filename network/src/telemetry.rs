//! Structured logging for fuzzing runs.

use tracing::Level;
use tracing_subscriber::{
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Registry,
};

/// Emit JSON logs at or above `level` to stdout.
///
/// Fails if a global subscriber is already installed.
pub fn init(level: Level) -> Result<(), TryInitError> {
    // Create fmt layer for logging
    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_line_number(true)
        .with_thread_ids(true)
        .with_file(true);

    // Create a filter layer to set the maximum level
    let filter = EnvFilter::new(level.to_string());

    // Set the global subscriber
    Registry::default().with(filter).with(fmt_layer).try_init()
}
