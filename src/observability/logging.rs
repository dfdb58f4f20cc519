//! # Structured Logging
//!
//! Subscriber setup for the `tracing` ecosystem. Levels come from `RUST_LOG` when
//! set, otherwise from the configured level; output is either human-readable or
//! one JSON object per line.

use crate::config::ObservabilityConfig;
use crate::errors::{CertsError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// Returns an error only for an unparsable filter directive. A subscriber that is
/// already installed (integration tests) is left in place.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.log_level)?,
    };

    let builder = fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json_logging {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed; keeping existing one");
    }
    Ok(())
}

fn build_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive).map_err(|e| {
        CertsError::config_with_source(format!("Invalid log level '{}'", directive), Box::new(e))
    })
}

/// Log the effective configuration without secret values.
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        http_bind = %config.server.bind_address(),
        database_url = %config.database.url,
        signing_backend = %config.signing.backend.kind(),
        default_validity_hours = config.signing.default_validity.num_hours(),
        min_rsa_bits = config.signing.min_rsa_bits,
        things_url = %config.things.url,
        "Configuration loaded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("thingcerts=debug,sqlx=warn").is_ok());
        assert!(matches!(build_filter("thingcerts=loud").unwrap_err(), CertsError::Config { .. }));
    }
}
