//! Tracing setup for the CLI. Logs go to stderr so they never interleave
//! with the interactive prompts on stdout.

use std::env;
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt};

const ENV_LOG_LEVEL: &str = "CTXPROBE_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "CTXPROBE_LOG_FORMAT";
const DEFAULT_LEVEL: &str = "warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Read `CTXPROBE_LOG_LEVEL` and `CTXPROBE_LOG_FORMAT`.
    pub fn from_env() -> Self {
        let level = env::var(ENV_LOG_LEVEL)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LEVEL.to_string());
        let format = match env::var(ENV_LOG_FORMAT) {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        Self { level, format }
    }
}

/// Install the global subscriber; returns the effective default level.
pub fn initialize_tracing(config: &LoggingConfig) -> String {
    let fmt_builder = fmt::fmt()
        .with_env_filter(build_env_filter(config))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true);

    if config.format == LogFormat::Json {
        fmt_builder.json().with_ansi(false).init();
    } else {
        fmt_builder.with_ansi(true).init();
    }

    config.level.clone()
}

fn default_level(config: &LoggingConfig) -> LevelFilter {
    config.level.parse::<LevelFilter>().unwrap_or(LevelFilter::WARN)
}

fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level(config).into())
            .parse_lossy("")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear() {
        unsafe {
            env::remove_var(ENV_LOG_LEVEL);
            env::remove_var(ENV_LOG_FORMAT);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear();
        let config = LoggingConfig::from_env();
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, LogFormat::Text);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear();
        unsafe {
            env::set_var(ENV_LOG_LEVEL, "debug");
            env::set_var(ENV_LOG_FORMAT, "JSON");
        }
        let config = LoggingConfig::from_env();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        clear();
    }

    #[test]
    #[serial]
    fn test_initialize_tracing_returns_configured_level() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Text,
        };
        assert_eq!(initialize_tracing(&config), "debug");
    }

    #[test]
    fn test_unparseable_level_falls_back_to_warn() {
        let config = LoggingConfig {
            level: "chatty".to_string(),
            format: LogFormat::Text,
        };
        assert_eq!(default_level(&config), LevelFilter::WARN);

        let config = LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Text,
        };
        assert_eq!(default_level(&config), LevelFilter::INFO);
    }
}
