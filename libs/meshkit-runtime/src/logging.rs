//! `tracing` subscriber bootstrap.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// `logging:` section of the application config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default directive, e.g. `info` or `meshkit_runtime=debug,info`.
    pub level: String,
    pub format: LogFormat,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
            with_target: true,
        }
    }
}

impl LoggingConfig {
    /// Filter from `RUST_LOG`, falling back to `level`.
    #[must_use]
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber.
///
/// # Errors
/// Fails when a global subscriber is already installed.
pub fn init_logging(cfg: &LoggingConfig) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(cfg.env_filter());
    match cfg.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(cfg.with_target),
            )
            .try_init()?,
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(cfg.with_target))
            .try_init()?,
    }
    Ok(())
}

/// Raise the filter by `-v` count: 1 = debug, 2+ = trace.
#[must_use]
pub fn with_verbosity(mut cfg: LoggingConfig, verbose: u8) -> LoggingConfig {
    match verbose {
        0 => {}
        1 => cfg.level = "debug".to_owned(),
        _ => cfg.level = "trace".to_owned(),
    }
    cfg
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn verbosity_overrides_level() {
        let cfg = LoggingConfig::default();
        assert_eq!(with_verbosity(cfg.clone(), 0).level, "info");
        assert_eq!(with_verbosity(cfg.clone(), 1).level, "debug");
        assert_eq!(with_verbosity(cfg, 3).level, "trace");
    }

    #[test]
    fn format_parses_lowercase() {
        let cfg: LoggingConfig = serde_json::from_str(r#"{"format":"json"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.level, "info");
    }
}
