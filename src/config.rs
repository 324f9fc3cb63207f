//! Configuration management

use std::path::PathBuf;
use std::time::Duration;

use crate::chat::DEFAULT_CAPACITY;
use crate::error::ConfigError;
use crate::rules::Rules;

/// Longest history retention accepted (ten years)
pub const MAX_RETENTION_DAYS: i64 = 3650;

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Master switch for autonomous cycles
    pub enabled: bool,

    /// Time between analysis cycles
    pub interval: Duration,

    /// Messages kept in the chat window
    pub buffer_capacity: usize,

    /// Directory for daily action/feedback logs and reports
    pub feedback_dir: PathBuf,

    /// Days of history kept before purging
    pub retention_days: i64,

    /// Per-category rules
    pub rules: Rules,

    /// Anthropic API key (optional - selects the hosted analysis strategy)
    pub anthropic_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            buffer_capacity: DEFAULT_CAPACITY,
            feedback_dir: default_feedback_dir(),
            retention_days: 30,
            rules: Rules::default(),
            anthropic_api_key: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let enabled = std::env::var("AUTOPILOT_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.enabled);

        let interval = match std::env::var("AUTOPILOT_INTERVAL_SECS") {
            Ok(v) => Duration::from_secs(parse_number("AUTOPILOT_INTERVAL_SECS", &v)?),
            Err(_) => defaults.interval,
        };

        let buffer_capacity = match std::env::var("AUTOPILOT_BUFFER_CAPACITY") {
            Ok(v) => parse_number("AUTOPILOT_BUFFER_CAPACITY", &v)? as usize,
            Err(_) => defaults.buffer_capacity,
        };

        let feedback_dir = std::env::var("AUTOPILOT_FEEDBACK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.feedback_dir);

        let retention_days = match std::env::var("AUTOPILOT_RETENTION_DAYS") {
            Ok(v) => i64::try_from(parse_number("AUTOPILOT_RETENTION_DAYS", &v)?)
                .map_err(|_| ConfigError::invalid("AUTOPILOT_RETENTION_DAYS", "out of range"))?,
            Err(_) => defaults.retention_days,
        };

        let rules = match std::env::var("AUTOPILOT_RULES") {
            Ok(path) => {
                let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                Rules::from_toml(&content)?
            }
            Err(_) => defaults.rules,
        };

        let anthropic_api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let config = Self {
            enabled,
            interval,
            buffer_capacity,
            feedback_dir,
            retention_days,
            rules,
            anthropic_api_key,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the monitor cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::invalid("interval", "must be greater than zero"));
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::invalid("buffer_capacity", "must be greater than zero"));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(ConfigError::invalid(
                "retention_days",
                format!("must be within 1..{}", MAX_RETENTION_DAYS),
            ));
        }
        if self.feedback_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing("feedback_dir".to_string()));
        }
        self.rules.validate()
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(name, format!("'{}' is not a number", value)))
}

fn default_feedback_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chat-autopilot")
        .join("feedback")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer_capacity, 100);
        assert!(config.feedback_dir.ends_with("chat-autopilot/feedback"));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let config = Config {
            interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_zero_retention() {
        let config = Config {
            retention_days: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_retention() {
        let config = Config {
            retention_days: 200_000_000_000,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "retention_days"
        ));

        let config = Config {
            retention_days: MAX_RETENTION_DAYS,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("X", " 45 ").unwrap(), 45);
        assert!(parse_number("X", "soon").is_err());
    }
}
