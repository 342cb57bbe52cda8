//! # Nova Telemetry
//!
//! Zero-config structured logging for the Nova metadata core, built on
//! `tracing` + `tracing-subscriber`. Every operation in `nova-store` emits
//! spans carrying the `(tenant, namespace)` scope; this crate is only
//! responsible for wiring those spans to an output.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for local development.
    #[default]
    Pretty,
    /// Structured JSON, for shipping to a log aggregator.
    Json,
}

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("global tracing subscriber already installed")]
    AlreadyInitialized,
}

/// Install the global `tracing` subscriber.
///
/// `level` follows `EnvFilter` syntax (e.g. `"info"`, `"nova_store=debug,info"`).
/// Returns [`TelemetryError::AlreadyInitialized`] if called more than once
/// per process — callers (tests especially) should call this at most once
/// and share the result, or call [`init`] inside `std::sync::Once`.
pub fn init(level: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true);

    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    result.map_err(|_| TelemetryError::AlreadyInitialized)
}

/// Install a subscriber suitable for tests: pretty output, `debug` level,
/// tolerant of being called multiple times across test binaries.
pub fn init_for_tests() {
    let _ = init("debug", LogFormat::Pretty);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_format_is_pretty() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }

    #[test]
    fn init_for_tests_does_not_panic_on_repeat_calls() {
        init_for_tests();
        init_for_tests();
    }
}
