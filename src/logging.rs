//! Tracing setup
//!
//! Structured logging through `tracing` and `tracing-subscriber`:
//! - pretty, compact or JSON output
//! - `RUST_LOG` overrides the configured level
//! - level and format taken from [`RemconConfig`]
//!
//! Exchanges are logged at `trace` (`sem_remcon::remcon::client`), console
//! failures at `warn`.
//!
//! # Example
//! ```no_run
//! use sem_remcon::{config::RemconConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RemconConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!("Console link starting");
//! # Ok(())
//! # }
//! ```

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::RemconConfig;
use crate::error::{SemError, SemResult};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, coloured (interactive use)
    Pretty,
    /// One line per event, no colour
    Compact,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = SemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            _ => Err(SemError::Configuration(format!(
                "Invalid log format '{s}'. Must be one of: pretty, compact, json"
            ))),
        }
    }
}

/// Tracing options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Log span open/close
    pub with_span_events: bool,
    /// Include file and line
    pub with_file_and_line: bool,
    /// ANSI colours (pretty format only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// From the `[logging]` section.
    pub fn from_config(config: &RemconConfig) -> SemResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.logging.level)?,
            format: config.logging.format.parse()?,
            ..Default::default()
        })
    }

    /// Defaults at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable ANSI colours
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialise tracing from the `[logging]` section.
pub fn init_from_config(config: &RemconConfig) -> SemResult<()> {
    init(TracingConfig::from_config(config)?)
}

fn already_set(e: &dyn std::error::Error) -> bool {
    e.to_string()
        .contains("a global default trace dispatcher has already been set")
}

fn finish(result: Result<(), tracing_subscriber::util::TryInitError>) -> SemResult<()> {
    result.or_else(|e| {
        // Tests and embedding hosts may have installed a subscriber already
        if already_set(&e) {
            Ok(())
        } else {
            Err(SemError::Configuration(format!(
                "Failed to initialize tracing: {e}"
            )))
        }
    })
}

/// Install the global subscriber. Idempotent: a second call is a no-op.
pub fn init(config: TracingConfig) -> SemResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        OutputFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            finish(tracing_subscriber::registry().with(layer).try_init())
        }
        OutputFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_ansi(false)
                .with_filter(env_filter);
            finish(tracing_subscriber::registry().with(layer).try_init())
        }
        OutputFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_filter(env_filter);
            finish(tracing_subscriber::registry().with(layer).try_init())
        }
    }
}

fn parse_log_level(level: &str) -> SemResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(SemError::Configuration(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("WARN").unwrap(), Level::WARN);
        assert!(parse_log_level("chatty").is_err());
    }

    #[test]
    fn test_from_config() {
        let mut config = RemconConfig::default();
        config.logging.level = "debug".into();
        config.logging.format = "json".into();
        let tracing = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing.level, Level::DEBUG);
        assert_eq!(tracing.format, OutputFormat::Json);
    }

    #[test]
    fn test_init_twice_is_ok() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Compact)
            .with_span_events(false)
            .with_ansi(false);
        assert!(init(config.clone()).is_ok());
        assert!(init(config).is_ok());
    }
}
