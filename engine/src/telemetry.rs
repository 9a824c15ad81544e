//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging of conversation
//! sessions and evaluation runs. Logs always go to stderr so that verdicts and
//! run outcomes printed on stdout stay machine-readable for the workflow step
//! that consumes them.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output
    Pretty,
    /// One JSON object per event, with the current span
    Json,
}

impl LogFormat {
    /// Pretty in debug builds, JSON in release builds.
    pub fn for_build() -> Self {
        if cfg!(debug_assertions) {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

/// Initialize the tracing subscriber with the given log level and format.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter > default "info".
/// Only the first successful call installs a subscriber.
pub fn init_telemetry_with(log_level: &str, format: LogFormat) {
    let default_filter = format!("{},duel_engine={}", log_level, log_level);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .try_init()
                .ok();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_writer(std::io::stderr),
                )
                .try_init()
                .ok();
        }
    }
}

/// Initialize the tracing subscriber with the build-dependent format.
pub fn init_telemetry_with_level(log_level: &str) {
    init_telemetry_with(log_level, LogFormat::for_build());
}
