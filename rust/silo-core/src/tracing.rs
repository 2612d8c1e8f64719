//! Helpers to wrangle logging across Silo crates
//! NOTE: [initialize_tracing] should only ever be called in tests or
//! binaries; a library should only concern itself with instrumentation and
//! logging.

use std::sync::Once;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// The crates that are considered when building the default logging
/// directives
pub static SILO_LOG_LEVEL_CRATES: &[&str] = &["silo_core", "silo_storage", "silo_replication"];

static INITIALIZE: Once = Once::new();

/// Install a global tracing subscriber. `RUST_LOG` wins when set; otherwise
/// the given level (default `debug`) is applied to every Silo crate.
/// Safe to call repeatedly; only the first call has any effect.
pub fn initialize_tracing(default_level: Option<&str>) {
    let level = default_level.unwrap_or("debug").to_owned();

    INITIALIZE.call_once(move || {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                SILO_LOG_LEVEL_CRATES
                    .iter()
                    .map(|krate| format!("{krate}={level}"))
                    .collect::<Vec<String>>()
                    .join(","),
            )
        });

        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .try_init();
    });
}
