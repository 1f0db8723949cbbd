//! Logging initialization.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LoggingSettings, SettingsError};

/// Install a global subscriber according to `settings`.
///
/// `RUST_LOG` takes precedence over the configured filter. Calling this
/// more than once is harmless; later calls leave the first subscriber in
/// place.
pub fn init(settings: &LoggingSettings) -> Result<(), SettingsError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .map_err(|e| SettingsError::InvalidConfig(format!("invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if settings.json {
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(false)
            .json();
        registry.with(layer).try_init().ok();
    } else {
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact();
        registry.with(layer).try_init().ok();
    }

    Ok(())
}

/// Initialize logging for tests, once per process.
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("clusterproxy=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
