//! Structured logging setup.
//!
//! Components log through `tracing` macros with structured fields:
//!
//! ```ignore
//! error!(id = row.id, topic = %row.topic, error = %err, "outbox_publish_error");
//! warn!(coordinate = %record.coordinate, reason = %reason, retry, "record_dead_lettered");
//! ```
//!
//! [`init_tracing`] installs the process-wide subscriber that renders them.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogConfig, LogFormat};

/// Install a `tracing` subscriber writing to stdout.
///
/// `RUST_LOG`, when set, takes precedence over `config.level`. Fails if a
/// global subscriber is already installed, so calling it twice is harmless.
pub fn init_tracing(config: &LogConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new(parse_log_level(&config.level).to_string()));

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init(),
    }
}

/// Map a level name to a `tracing` level. Unknown names are `INFO`.
pub fn parse_log_level(level: &str) -> tracing::Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
