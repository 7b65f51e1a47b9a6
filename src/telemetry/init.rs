// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing subscriber setup for the CLI.

use std::io;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

/// Level used when neither the config nor the command line names one.
const DEFAULT_LEVEL: Level = Level::WARN;

/// How chatty the command line asked the weaver to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Whatever `logging.level` says.
    #[default]
    Normal,
    /// `--verbose`: debug level, one line per woven method.
    Verbose,
    /// `--debug`: trace for the weaver's own targets, with span timings.
    Debug,
}

impl Verbosity {
    /// `--debug` wins over `--verbose`.
    pub fn from_flags(verbose: bool, debug: bool) -> Self {
        match (verbose, debug) {
            (_, true) => Self::Debug,
            (true, false) => Self::Verbose,
            (false, false) => Self::Normal,
        }
    }
}

/// Subscriber settings resolved from `logging` config and CLI flags.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Level applied when `RUST_LOG` is unset.
    pub level: Level,

    /// Fixed filter that ignores `RUST_LOG`.
    pub filter_directive: Option<String>,

    pub ansi: bool,

    /// Span close timings, file and line, multi-line events.
    pub detailed: bool,
}

impl TelemetryConfig {
    /// Resolve the subscriber settings.
    ///
    /// An unknown `logging.level` is a config error rather than a silent fallback.
    pub fn new(logging: &LoggingConfig, verbosity: Verbosity) -> Result<Self, ConfigError> {
        let configured = match logging.level.as_deref() {
            Some(raw) => raw
                .trim()
                .parse::<Level>()
                .map_err(|_| ConfigError::InvalidValue {
                    field: "logging.level".to_string(),
                    message: format!("unknown level '{}'", raw),
                })?,
            None => DEFAULT_LEVEL,
        };
        let ansi = logging.ansi.unwrap_or(true);

        Ok(match verbosity {
            Verbosity::Normal => Self {
                level: configured,
                filter_directive: None,
                ansi,
                detailed: false,
            },
            Verbosity::Verbose => Self {
                level: configured.max(Level::DEBUG),
                filter_directive: None,
                ansi,
                detailed: false,
            },
            Verbosity::Debug => Self {
                level: Level::TRACE,
                filter_directive: Some(format!("{}=trace", env!("CARGO_CRATE_NAME"))),
                ansi,
                detailed: true,
            },
        })
    }

    fn filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.as_str().to_ascii_lowercase());
        match &self.filter_directive {
            Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<()> {
    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi)
        .with_file(config.detailed)
        .with_line_number(config.detailed);
    let registry = tracing_subscriber::registry().with(config.filter());

    let installed = if config.detailed {
        registry
            .with(fmt_layer.with_span_events(FmtSpan::CLOSE))
            .try_init()
    } else {
        registry.with(fmt_layer.compact()).try_init()
    };
    installed.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logging(level: Option<&str>, ansi: Option<bool>) -> LoggingConfig {
        LoggingConfig {
            level: level.map(str::to_string),
            ansi,
        }
    }

    #[test]
    fn test_verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Debug);
    }

    #[test]
    fn test_unset_logging_is_quiet_and_colored() {
        let config = TelemetryConfig::new(&LoggingConfig::default(), Verbosity::Normal).unwrap();
        assert_eq!(config.level, Level::WARN);
        assert!(config.ansi);
        assert!(!config.detailed);
        assert!(config.filter_directive.is_none());
    }

    #[test]
    fn test_configured_level_and_ansi() {
        let config =
            TelemetryConfig::new(&logging(Some("Info"), Some(false)), Verbosity::Normal).unwrap();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.ansi);
    }

    #[test]
    fn test_verbose_raises_but_never_lowers() {
        let quiet = TelemetryConfig::new(&logging(Some("error"), None), Verbosity::Verbose).unwrap();
        assert_eq!(quiet.level, Level::DEBUG);

        let loud = TelemetryConfig::new(&logging(Some("trace"), None), Verbosity::Verbose).unwrap();
        assert_eq!(loud.level, Level::TRACE);
    }

    #[test]
    fn test_debug_pins_weaver_targets() {
        let config =
            TelemetryConfig::new(&logging(Some("error"), Some(false)), Verbosity::Debug).unwrap();
        assert_eq!(config.filter_directive.as_deref(), Some("weaver=trace"));
        assert!(config.detailed);
        assert!(!config.ansi);
    }

    #[test]
    fn test_unknown_level_is_rejected() {
        let err = TelemetryConfig::new(&logging(Some("loud"), None), Verbosity::Normal).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "logging.level"));
    }
}
