//! Tracing setup for the rights engine.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (typically the
/// configured service log level) seeds the filter. Call once at startup;
/// a second call panics in `init`, so embedders that manage their own
/// subscriber should skip this.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_level).map_err(|e| {
            crate::RightsError::InvalidArgument(format!(
                "invalid log filter {:?}: {}",
                default_level, e
            ))
        })?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();

    Ok(())
}
