// 📡 Logging setup
//
// Structured `tracing` output with a run-scoped span so every line emitted
// during a reconciliation carries the run id.

use std::fmt;
use std::str::FromStr;
use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{fmt as layer_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::ScdError;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable output.
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ScdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(ScdError::InvalidConfig(format!("unknown log format '{}'", other))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => f.write_str("json"),
            LogFormat::Pretty => f.write_str("pretty"),
        }
    }
}

/// Installs the global subscriber. Later calls are no-ops.
///
/// `RUST_LOG` controls levels and defaults to `info`. Logs go to stderr so
/// the `--json` summary on stdout stays machine-readable.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer_fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer_fmt::layer().with_target(false).with_writer(std::io::stderr))
                    .init();
            }
        }
    });
}

/// Span wrapping one reconciliation run.
pub fn run_span(run_id: &str, table: &str, run_timestamp: &str) -> Span {
    tracing::info_span!("scd_run", run_id = %run_id, table = %table, run_timestamp = %run_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_run_span_builds() {
        let span = run_span("run-1", "dim_customer", "2025-01-01T00:00:00Z");
        let _guard = span.enter();
    }
}
