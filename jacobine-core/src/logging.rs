//! Structured logging setup shared by all pipeline binaries.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Errors raised while installing the global tracing subscriber.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter directive: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Failed to install tracing subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize the global tracing subscriber from the logging section of the
/// configuration. `RUST_LOG` takes precedence over the configured level so
/// operators can raise verbosity without touching the config file.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) => EnvFilter::try_new(directives)?,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    Ok(())
}
