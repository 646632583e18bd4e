//! Subscriber setup for the webhook process.

use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Anything other than `json` selects plain text.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Builds the level filter. `RUST_LOG` wins over `level` when set.
pub fn env_filter(level: &str) -> Result<EnvFilter, String> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("invalid log level '{}': {}", level, e))
}

/// Installs the global subscriber and routes `log` records into it.
pub fn init_logging(level: &str, format: LogFormat) -> Result<(), String> {
    let filter = env_filter(level)?;
    LogTracer::init().map_err(|e| format!("failed to bridge log records: {}", e))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true).with_target(true)),
        ),
        LogFormat::Text => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))
        }
    };
    result.map_err(|e| format!("failed to install subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Text);
    }

    #[test]
    fn test_env_filter_rejects_garbage() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(env_filter("debug").is_ok());
            assert!(env_filter("info,kubetrail=[").is_err());
        }
    }
}
