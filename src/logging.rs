//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

use crate::config::{ApplicationSettings, LogFormat};
use crate::error::{BatchError, BatchResult};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Fails if the level directive is
/// malformed or a global subscriber is already installed.
pub fn init(settings: &ApplicationSettings) -> BatchResult<()> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(&settings.log_level),
    }
    .map_err(|err| BatchError::Configuration(format!("invalid log filter: {err}")))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match settings.log_format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|err| BatchError::Configuration(format!("logging already initialized: {err}")))
}
