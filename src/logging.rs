//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. the level passed in, usually from `--log-level`
//! 2. the `TSUMUGI_LOG` environment variable, full `EnvFilter` syntax
//! 3. `info`
//!
//! Log lines are routed through `tracing-indicatif` so they don't tear the
//! progress spinners of running tasks.

use tracing::Level;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the default filter.
pub const LOG_ENV: &str = "TSUMUGI_LOG";

/// Initialise the global subscriber. Fails when one is already set.
pub fn init_logging(level: Option<Level>) -> anyhow::Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::new(level.as_str().to_lowercase()),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .try_init()?;

    Ok(())
}
