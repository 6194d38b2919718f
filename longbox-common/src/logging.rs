//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global fmt subscriber filtered by `RUST_LOG` or `default_filter`
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(default_filter: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter '{}': {}", default_filter, e)))?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| crate::Error::LoggingInstalled(e.to_string()))
}
