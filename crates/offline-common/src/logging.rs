//! Logging setup for the offline crates.
//!
//! The agent's own targets log at [`LogConfig::level`]. Everything else
//! (reqwest, hyper, rustls) is held at [`LogConfig::dependency_level`].
//! An explicit filter string wins over `RUST_LOG`, which wins over both.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::{OfflineKitError, Result};

/// Targets that follow the agent log level.
pub const AGENT_TARGETS: &[&str] = &["offline_sw", "offline_probe", "offline_common"];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, human-readable.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// JSON objects, one per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level for [`AGENT_TARGETS`].
    pub level: Level,
    /// Level for every other target.
    pub dependency_level: Level,
    pub format: LogFormat,
    /// Source file and line on each event.
    pub include_location: bool,
    /// Span enter/close events (per agent event dispatch).
    pub include_span_events: bool,
    /// Full filter string, replacing the generated directives.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            dependency_level: Level::WARN,
            format: LogFormat::Pretty,
            include_location: false,
            include_span_events: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Debug output from the agent with dispatch spans; dependencies stay at warn.
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            include_location: true,
            include_span_events: true,
            ..Default::default()
        }
    }

    /// JSON output, dependencies limited to errors.
    pub fn production() -> Self {
        Self {
            dependency_level: Level::ERROR,
            format: LogFormat::Json,
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_dependency_level(mut self, level: Level) -> Self {
        self.dependency_level = level;
        self
    }

    /// Use `filter` instead of the generated directives.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Filter directives built from the two levels, e.g.
    /// `warn,offline_sw=info,offline_probe=info,offline_common=info`.
    pub fn directives(&self) -> String {
        let agent = level_name(self.level);
        std::iter::once(level_name(self.dependency_level))
            .chain(AGENT_TARGETS.iter().map(|target| format!("{target}={agent}")))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn build_filter(&self) -> Result<EnvFilter> {
        let (source, directives) = match (&self.filter, std::env::var(EnvFilter::DEFAULT_ENV)) {
            (Some(filter), _) => ("filter", filter.clone()),
            (None, Ok(env)) => (EnvFilter::DEFAULT_ENV, env),
            (None, Err(_)) => ("levels", self.directives()),
        };
        EnvFilter::try_new(&directives)
            .map_err(|e| OfflineKitError::config(format!("invalid log {source} {directives:?}: {e}")))
    }
}

fn level_name(level: Level) -> String {
    level.as_str().to_ascii_lowercase()
}

/// Install the global subscriber. Fails on a malformed filter or when a
/// subscriber is already installed.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let filter = config.build_filter()?;

    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_span_events(span_events),
            )
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_span_events(span_events),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_events(span_events),
            )
            .try_init(),
    };

    installed.map_err(|e| OfflineKitError::internal(format!("installing log subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(
            LogConfig::default().directives(),
            "warn,offline_sw=info,offline_probe=info,offline_common=info"
        );
    }

    #[test]
    fn test_verbose_raises_only_agent_targets() {
        let directives = LogConfig::verbose().directives();
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("offline_sw=debug"));
    }

    #[test]
    fn test_production() {
        let config = LogConfig::production();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(
            config.directives(),
            "error,offline_sw=info,offline_probe=info,offline_common=info"
        );
    }

    #[test]
    fn test_with_dependency_level() {
        let config = LogConfig::default().with_dependency_level(Level::TRACE);
        assert!(config.directives().starts_with("trace,"));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_custom_filter_is_validated() {
        let good = LogConfig::default().with_filter("offline_sw=trace,reqwest=off");
        assert!(good.build_filter().is_ok());

        let bad = LogConfig::default().with_filter("offline_sw=loud");
        let err = bad.build_filter().unwrap_err();
        assert_eq!(err.category(), "config");
    }
}
