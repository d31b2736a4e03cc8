//! # Logging
//!
//! One `tracing` subscriber per process, configured from a [`LoggingConfig`]:
//! pretty output while developing, JSON lines for the worker fleet, compact
//! in between. Workspace crates log at the configured level and `sqlx` at
//! `warn` unless a custom `EnvFilter` directive string replaces that.
//!
//! Worker processes usually take their settings from the environment:
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LoggingConfig};
//!
//! // SCROBBLE_LOG=core_indexing=debug SCROBBLE_LOG_FORMAT=json
//! init_logging(LoggingConfig::from_env()?)?;
//! tracing::info!(workers = 2, "Indexer started");
//! ```
//!
//! Job arguments carry access tokens, so anything credential-like goes
//! through [`redact_if_sensitive`] before it is logged.

use crate::error::{Error, Result};
use std::env;
use std::str::FromStr;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable holding a custom filter directive string
pub const LOG_FILTER_ENV: &str = "SCROBBLE_LOG";
/// Environment variable selecting the output format
pub const LOG_FORMAT_ENV: &str = "SCROBBLE_LOG_FORMAT";

const WORKSPACE_TARGETS: &[&str] = &[
    "scrobble_indexer",
    "core_runtime",
    "core_library",
    "core_indexing",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored
    Pretty,
    /// One JSON object per event
    Json,
    /// Single line per event
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(Error::Config(format!("Unknown log format: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(Error::Config(format!("Unknown log level: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// `EnvFilter` directives replacing the per-crate defaults
    pub filter: Option<String>,
    /// Log span open/close, so one ingestion run can be followed end to end
    pub span_events: bool,
    pub show_target: bool,
    pub show_thread: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            span_events: true,
            show_target: true,
            show_thread: false,
        }
    }
}

impl LoggingConfig {
    /// Defaults overridden by [`LOG_FILTER_ENV`] and [`LOG_FORMAT_ENV`].
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the format variable names no known format.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(filter) = env::var(LOG_FILTER_ENV) {
            if !filter.trim().is_empty() {
                config.filter = Some(filter);
            }
        }
        if let Ok(format) = env::var(LOG_FORMAT_ENV) {
            config.format = format.parse()?;
        }
        Ok(config)
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.span_events = enable;
        self
    }

    pub fn with_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn with_thread_info(mut self, show: bool) -> Self {
        self.show_thread = show;
        self
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let directives = match &self.filter {
            Some(custom) => custom.clone(),
            None => {
                let level = self.level.directive();
                let mut directives: Vec<String> = WORKSPACE_TARGETS
                    .iter()
                    .map(|target| format!("{}={}", target, level))
                    .collect();
                directives.push("sqlx=warn".to_string());
                directives.join(",")
            }
        };

        EnvFilter::try_new(&directives)
            .map_err(|e| Error::Config(format!("Invalid log filter '{}': {}", directives, e)))
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let spans = if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = tracing_subscriber::fmt::layer()
            .with_target(self.show_target)
            .with_thread_ids(self.show_thread)
            .with_thread_names(self.show_thread);

        match self.format {
            LogFormat::Pretty => layer.pretty().with_span_events(spans).boxed(),
            LogFormat::Compact => layer.compact().with_span_events(spans).boxed(),
            LogFormat::Json => layer
                .json()
                .flatten_event(true)
                .with_current_span(self.span_events)
                .with_span_list(false)
                .boxed(),
        }
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// [`Error::Config`] for an invalid filter, [`Error::Logging`] if a global
/// subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;

    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(filter)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

/// `[REDACTED]` in place of `value` when `field_name` looks like a credential.
///
/// ```
/// use core_runtime::logging::redact_if_sensitive;
///
/// assert_eq!(redact_if_sensitive("token", "abc123"), "[REDACTED]");
/// assert_eq!(redact_if_sensitive("username", "flicker"), "flicker");
/// ```
pub fn redact_if_sensitive(field_name: &str, value: &str) -> String {
    const CREDENTIAL_MARKERS: &[&str] = &[
        "token",
        "session",
        "password",
        "secret",
        "api_key",
        "authorization",
        "bearer",
    ];

    let field = field_name.to_ascii_lowercase();
    if CREDENTIAL_MARKERS.iter().any(|marker| field.contains(marker)) {
        "[REDACTED]".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = LoggingConfig::default()
            .with_format(LogFormat::Json)
            .with_level(LogLevel::Debug)
            .with_filter("core_library=trace")
            .with_spans(false)
            .with_thread_info(true);

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.filter.as_deref(), Some("core_library=trace"));
        assert!(!config.span_events);
        assert!(config.show_target);
        assert!(config.show_thread);
    }

    #[test]
    fn test_redaction() {
        assert_eq!(redact_if_sensitive("token", "abc"), "[REDACTED]");
        assert_eq!(redact_if_sensitive("session_key", "abc"), "[REDACTED]");
        assert_eq!(redact_if_sensitive("Authorization", "Bearer x"), "[REDACTED]");
        assert_eq!(redact_if_sensitive("username", "flicker"), "flicker");
        assert_eq!(redact_if_sensitive("job_id", "42"), "42");
    }

    #[test]
    fn test_parse_level_and_format() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
        assert!(LogLevel::Error > LogLevel::Info);

        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_filter_covers_workspace() {
        let filter = LoggingConfig::default()
            .with_level(LogLevel::Debug)
            .env_filter()
            .unwrap()
            .to_string();

        assert!(filter.contains("core_indexing=debug"));
        assert!(filter.contains("core_library=debug"));
        assert!(filter.contains("sqlx=warn"));
    }

    #[test]
    fn test_custom_filter_replaces_defaults() {
        let filter = LoggingConfig::default()
            .with_filter("core_library=trace")
            .env_filter()
            .unwrap()
            .to_string();

        assert!(filter.contains("core_library=trace"));
        assert!(!filter.contains("sqlx"));
    }

    #[test]
    fn test_invalid_filter() {
        let result = LoggingConfig::default()
            .with_filter("core_library=loud")
            .env_filter();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
