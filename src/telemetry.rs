//! Tracing subscriber setup for the server binary.

use tracing::Level;

use crate::config::LogLevel;

/// Installs the fmt subscriber. `RUST_LOG` overrides the configured level
/// when set.
pub fn setup_tracing(log_level: &LogLevel) {
    let level: Level = log_level.into();
    let default_filter = format!("keep_alerts={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
