//! Shared telemetry bootstrap for polystore binaries and tests.

use crate::{Error, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Fails if a
/// subscriber is already installed.
pub fn init() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::Config(format!("tracing subscriber init failed: {}", e)))
}

/// Best-effort variant for tests: repeated installs are fine.
pub fn init_for_tests() {
    let _ = init();
}
