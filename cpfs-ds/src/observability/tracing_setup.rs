//! Subscriber installation.

use super::{LogFormat, TracingConfig};
use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps logging installed; hold it for the life of the process.
#[must_use]
pub struct TracingGuard {
    service_name: String,
}

impl TracingGuard {
    /// Service name the subscriber was installed for.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        tracing::debug!(service = %self.service_name, "Logging shut down");
    }
}

/// Parse the configured filter, falling back to `info` on bad directives.
pub fn build_filter(config: &TracingConfig) -> EnvFilter {
    EnvFilter::try_new(config.log_filter()).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: TracingConfig) -> Result<TracingGuard> {
    let filter = build_filter(&config);
    let registry = tracing_subscriber::registry().with(filter);
    let location = config.include_location();

    match config.log_format() {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_file(location)
                    .with_line_number(location)
                    .with_target(config.include_target())
                    .with_thread_names(config.include_thread_names())
                    .with_thread_ids(config.include_thread_ids()),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(location)
                    .with_line_number(location)
                    .with_target(config.include_target())
                    .with_thread_names(config.include_thread_names())
                    .with_thread_ids(config.include_thread_ids()),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_file(location)
                    .with_line_number(location)
                    .with_target(config.include_target())
                    .with_thread_names(config.include_thread_names())
                    .with_thread_ids(config.include_thread_ids()),
            )
            .try_init(),
    }
    .context("Failed to initialize tracing subscriber")?;

    tracing::info!(service = %config.service_name(), format = ?config.log_format(), "Logging initialized");
    Ok(TracingGuard {
        service_name: config.service_name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_filter_falls_back_to_info() {
        let config = TracingConfig::builder()
            .log_filter("cpfs_ds=loudest")
            .build();
        assert_eq!(
            build_filter(&config).max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::INFO)
        );
    }

    #[test]
    fn second_init_fails() {
        // Only this test installs a global subscriber in the unit test binary.
        let first = init_tracing(TracingConfig::default());
        let second = init_tracing(TracingConfig::default());
        assert!(first.is_ok());
        assert!(second.is_err());
    }
}
