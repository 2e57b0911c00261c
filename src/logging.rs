// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The log level is taken from the `PSYSESSION_LOG` environment variable
//! (e.g. "info", "debug", or a full env-filter directive) and defaults to
//! `info`. Logs go to STDERR so stdout stays free for the event stream when
//! the transport pipes it through.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global logging subscriber.
///
/// Safe to call once at startup; calling it twice returns an error from the
/// underlying subscriber registration.
pub fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_env("PSYSESSION_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))?;

    Ok(())
}
