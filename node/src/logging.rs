//! # Structured Logging
//!
//! One global `tracing` subscriber, filtered by `RUST_LOG` and printed to
//! stderr either as readable lines or as JSON objects. stdout is left to
//! command output such as `escrow-node status`.
//!
//! Ledger rejections are logged at `debug` under the `escrow_contracts`
//! target, so `RUST_LOG=escrow_contracts=debug` shows every refused call
//! with its caller and reason.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str =
    "escrow_node=info,escrow_contracts=info,escrow_protocol=info,tower_http=info";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Colored, multi-field lines for a terminal.
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

/// `RUST_LOG` if it parses, `fallback` otherwise.
fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already set.
pub fn init_logging(fallback: &str, format: LogFormat) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(fallback));

    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
    }

    tracing::debug!(format = ?format, "subscriber installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
    }

    #[test]
    fn format_names_match_cli_values() {
        assert_eq!(
            LogFormat::from_str("json", true).unwrap(),
            LogFormat::Json
        );
        assert_eq!(
            LogFormat::from_str("PRETTY", true).unwrap(),
            LogFormat::Pretty
        );
        assert!(LogFormat::from_str("xml", true).is_err());
    }
}
