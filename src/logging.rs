//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::error::{JibError, JibResult};

/// Build the filter: `RUST_LOG` wins, otherwise the configured level.
pub fn env_filter(config: &LogConfig) -> JibResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| JibError::Configuration(format!("invalid log level '{}': {e}", config.level)))
}

/// Install the global fmt subscriber. A second call is a no-op.
pub fn init(config: &LogConfig) -> JibResult<()> {
    let filter = env_filter(config)?;
    // Fails only if a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
    Ok(())
}
