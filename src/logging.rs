//! Structured logging
//!
//! Built on `tracing` and `tracing-subscriber`. Events are written to stderr
//! so command output on stdout stays machine readable. `RUST_LOG` overrides
//! the configured level when set.
//!
//! # Example
//! ```no_run
//! use pace_scpi::{config::PaceConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PaceConfig::load()?;
//! logging::init_from_config(&config)?;
//!
//! info!(address = %config.connection.address, "connecting");
//! # Ok(())
//! # }
//! ```

use crate::config::PaceConfig;
use crate::error::{PaceError, PaceResult};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter, Layer,
};

/// Output format for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Multi-line, coloured (interactive use)
    Pretty,
    /// Single line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Logging options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: OutputFormat,
    /// Emit span NEW/CLOSE events
    pub with_span_events: bool,
    pub with_file_and_line: bool,
    pub with_thread_names: bool,
    /// Only honoured by the pretty format
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_thread_names: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Level taken from `[application] log_level`.
    pub fn from_config(config: &PaceConfig) -> PaceResult<Self> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?))
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize logging from the application configuration.
pub fn init_from_config(config: &PaceConfig) -> PaceResult<()> {
    init(TracingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// Idempotent: if a subscriber is already installed (tests, embedding
/// applications) this returns `Ok(())`.
pub fn init(config: TracingConfig) -> PaceResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(span_events)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line)
        .with_thread_names(config.with_thread_names);

    let registry = tracing_subscriber::registry();
    let result = match config.format {
        OutputFormat::Pretty => registry
            .with(base.pretty().with_ansi(config.with_ansi).with_filter(env_filter))
            .try_init(),
        OutputFormat::Compact => registry
            .with(base.compact().with_ansi(false).with_filter(env_filter))
            .try_init(),
        OutputFormat::Json => registry
            .with(base.json().with_filter(env_filter))
            .try_init(),
    };
    result.or_else(already_initialized)
}

fn already_initialized(error: TryInitError) -> PaceResult<()> {
    if error
        .to_string()
        .contains("a global default trace dispatcher has already been set")
    {
        Ok(())
    } else {
        Err(PaceError::Config(format!("Failed to initialize logging: {}", error)))
    }
}

/// Parse a case-insensitive level name.
pub fn parse_log_level(level: &str) -> PaceResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(PaceError::Config(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("warn").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("Debug").unwrap(), Level::DEBUG);
        assert!(matches!(parse_log_level("loud"), Err(PaceError::Config(_))));
    }

    #[test]
    fn test_tracing_config_from_config() {
        let mut config = PaceConfig::default();
        config.application.log_level = "debug".to_string();
        let tracing_config = TracingConfig::from_config(&config).unwrap();
        assert_eq!(tracing_config.level, Level::DEBUG);

        config.application.log_level = "chatty".to_string();
        assert!(TracingConfig::from_config(&config).is_err());
    }

    #[test]
    fn test_tracing_config_builder() {
        let config = TracingConfig::new(Level::WARN)
            .with_format(OutputFormat::Json)
            .with_span_events(true)
            .with_ansi(false);

        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, OutputFormat::Json);
        assert!(config.with_span_events);
        assert!(!config.with_ansi);
    }

    #[test]
    fn test_init_is_idempotent() {
        init(TracingConfig::default()).unwrap();
        init(TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Json)).unwrap();
    }
}
