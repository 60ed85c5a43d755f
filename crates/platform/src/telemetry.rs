//! Tracing subscriber bootstrap
//!
//! The gateway logs through `tracing`; this module installs the global
//! `fmt` subscriber with an [`EnvFilter`]. `RUST_LOG` takes precedence over
//! the filter passed in from configuration.

use crate::error::{PlatformError, PlatformResult};
use tracing_subscriber::EnvFilter;

/// Default filter when neither `RUST_LOG` nor configuration provide one
pub const DEFAULT_FILTER: &str = "info,tngf_proto::ipsec=debug";

/// Build the filter, preferring `RUST_LOG` over `fallback`
pub fn env_filter(fallback: &str) -> PlatformResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(fallback)
            .map_err(|e| PlatformError::Config(format!("invalid log filter {:?}: {}", fallback, e))),
    }
}

/// Install the global tracing subscriber
///
/// # Errors
///
/// Returns `PlatformError::Config` if the filter does not parse or a global
/// subscriber is already installed.
pub fn init_tracing(filter: &str) -> PlatformResult<()> {
    let filter = env_filter(filter)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| PlatformError::Config(format!("tracing already initialised: {}", e)))
}
