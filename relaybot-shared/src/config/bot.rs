use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported configuration format '{extension}'. Use 'yaml', 'json' or 'toml'")]
    UnsupportedFormat { extension: String },

    #[error("failed to parse configuration: {message}")]
    Parse { message: String },

    #[error("invalid {variable} value: {message}")]
    InvalidEnv { variable: String, message: String },

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Identity the bot publishes under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Protocol user id of the bot account.
    pub user_id: String,
    /// Agent id attached to every published event.
    pub agent_id: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            user_id: "@aibot:localhost".to_string(),
            agent_id: "relaybot".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Settings for turning model output into chat events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Ceiling on reasoning plus content bytes carried by one event.
    pub event_size_max: usize,
    /// Minimum spacing between throttled publishes.
    pub throttle_ms: u64,
    /// Reasoning placeholder shown until real output arrives.
    pub thinking_message: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            event_size_max: 16 * 1024,
            throttle_ms: 250,
            thinking_message: "Thinking...".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentCacheConfig {
    /// Entry count above which expired and least recently used entries are dropped.
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl Default for AttachmentCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl_secs: 30 * 60,
        }
    }
}

/// Delimiters marking inline command blocks in free text output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub open_delimiter: String,
    pub close_delimiter: String,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            open_delimiter: "<option>".to_string(),
            close_delimiter: "</option>".to_string(),
        }
    }
}

/// The main configuration structure for relaybot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bot: BotConfig,
    pub logging: LoggingConfig,
    pub publisher: PublisherConfig,
    pub attachments: AttachmentCacheConfig,
    pub parser: ParserConfig,
}

impl Config {
    /// Generates a default configuration.
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Environment variables only apply to values the file left at their default.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an environment
    /// override is malformed, or the resolved configuration is invalid.
    pub fn load_config(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::with_defaults(),
        };

        config.apply_env_overrides()?;
        config.validate().map_err(ConfigError::Invalid)?;

        debug!(
            path = ?config_path,
            event_size_max = config.publisher.event_size_max,
            throttle_ms = config.publisher.throttle_ms,
            "configuration loaded"
        );
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();

        let parse_error = |message: String| ConfigError::Parse { message };
        match extension {
            "yaml" | "yml" => serde_yml::from_str(&content).map_err(|e| parse_error(e.to_string())),
            "json" => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
            "toml" => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
            other => Err(ConfigError::UnsupportedFormat {
                extension: other.to_string(),
            }),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let defaults = Self::with_defaults();

        if self.logging.level == defaults.logging.level {
            if let Ok(level) = env::var("RELAYBOT_LOG_LEVEL") {
                self.logging.level = level;
            }
        }
        if self.logging.format == defaults.logging.format {
            if let Ok(format) = env::var("RELAYBOT_LOG_FORMAT") {
                self.logging.format = format.parse().map_err(|message| ConfigError::InvalidEnv {
                    variable: "RELAYBOT_LOG_FORMAT".to_string(),
                    message,
                })?;
            }
        }
        if self.publisher.event_size_max == defaults.publisher.event_size_max {
            if let Ok(size) = env::var("RELAYBOT_EVENT_SIZE_MAX") {
                self.publisher.event_size_max =
                    size.parse().map_err(|_| ConfigError::InvalidEnv {
                        variable: "RELAYBOT_EVENT_SIZE_MAX".to_string(),
                        message: "must be a positive number of bytes".to_string(),
                    })?;
            }
        }
        if self.publisher.throttle_ms == defaults.publisher.throttle_ms {
            if let Ok(window) = env::var("RELAYBOT_THROTTLE_MS") {
                self.publisher.throttle_ms =
                    window.parse().map_err(|_| ConfigError::InvalidEnv {
                        variable: "RELAYBOT_THROTTLE_MS".to_string(),
                        message: "must be a number of milliseconds".to_string(),
                    })?;
            }
        }
        if self.bot.agent_id == defaults.bot.agent_id {
            if let Ok(agent_id) = env::var("RELAYBOT_AGENT_ID") {
                self.bot.agent_id = agent_id;
            }
        }
        if self.bot.user_id == defaults.bot.user_id {
            if let Ok(user_id) = env::var("RELAYBOT_USER_ID") {
                self.bot.user_id = user_id;
            }
        }

        Ok(())
    }

    /// Validate the complete configuration
    ///
    /// # Errors
    /// Returns every problem found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.publisher.event_size_max == 0 {
            errors.push("publisher.event_size_max must be greater than 0".to_string());
        }
        if self.attachments.max_entries == 0 {
            errors.push("attachments.max_entries must be greater than 0".to_string());
        }
        if self.attachments.ttl_secs == 0 {
            errors.push("attachments.ttl_secs must be greater than 0".to_string());
        }
        if self.parser.open_delimiter.is_empty() || self.parser.close_delimiter.is_empty() {
            errors.push("parser delimiters must not be empty".to_string());
        } else if self.parser.open_delimiter == self.parser.close_delimiter {
            errors.push("parser open and close delimiters must differ".to_string());
        }
        if self.bot.agent_id.trim().is_empty() {
            errors.push("bot.agent_id must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("RELAYBOT_LOG_LEVEL");
            env::remove_var("RELAYBOT_LOG_FORMAT");
            env::remove_var("RELAYBOT_EVENT_SIZE_MAX");
            env::remove_var("RELAYBOT_THROTTLE_MS");
            env::remove_var("RELAYBOT_AGENT_ID");
            env::remove_var("RELAYBOT_USER_ID");
        }
    }

    #[test]
    fn test_config_with_defaults() {
        let config = Config::with_defaults();

        assert_eq!(config.publisher.event_size_max, 16 * 1024);
        assert_eq!(config.publisher.throttle_ms, 250);
        assert_eq!(config.attachments.max_entries, 100);
        assert_eq!(config.attachments.ttl_secs, 1800);
        assert_eq!(config.parser.open_delimiter, "<option>");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_config_without_file() {
        cleanup_env_vars();
        let config = Config::load_config(None).unwrap();
        assert_eq!(config, Config::with_defaults());
    }

    #[test]
    #[serial]
    fn test_load_config_from_yaml_file() -> Result<(), Box<dyn std::error::Error>> {
        cleanup_env_vars();
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("relaybot.yaml");
        fs::write(
            &path,
            "publisher:\n  event_size_max: 2048\nlogging:\n  level: debug\n  format: json\n",
        )?;

        let config = Config::load_config(Some(&path))?;

        assert_eq!(config.publisher.event_size_max, 2048);
        assert_eq!(config.publisher.throttle_ms, 250);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        Ok(())
    }

    #[test]
    #[serial]
    fn test_load_config_from_json_and_toml_files() -> Result<(), Box<dyn std::error::Error>> {
        cleanup_env_vars();
        let temp_dir = TempDir::new()?;

        let json_path = temp_dir.path().join("relaybot.json");
        fs::write(&json_path, r#"{ "bot": { "agent_id": "agent-json" } }"#)?;
        assert_eq!(Config::load_config(Some(&json_path))?.bot.agent_id, "agent-json");

        let toml_path = temp_dir.path().join("relaybot.toml");
        fs::write(&toml_path, "[attachments]\nmax_entries = 5\n")?;
        assert_eq!(Config::load_config(Some(&toml_path))?.attachments.max_entries, 5);
        Ok(())
    }

    #[test]
    fn test_load_config_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("relaybot.ini");
        fs::write(&path, "level=info").unwrap();

        let err = Config::load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_load_config_malformed_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("relaybot.yaml");
        fs::write(&path, "publisher: [unclosed").unwrap();

        let err = Config::load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_config_nonexistent_file() {
        let err = Config::load_config(Some(Path::new("/nonexistent/relaybot.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    #[serial]
    fn test_environment_overrides_defaults_only() -> Result<(), Box<dyn std::error::Error>> {
        cleanup_env_vars();
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("relaybot.yaml");
        fs::write(&path, "publisher:\n  throttle_ms: 500\n")?;

        unsafe {
            env::set_var("RELAYBOT_THROTTLE_MS", "100");
            env::set_var("RELAYBOT_EVENT_SIZE_MAX", "4096");
            env::set_var("RELAYBOT_LOG_FORMAT", "json");
            env::set_var("RELAYBOT_AGENT_ID", "agent-env");
        }

        let config = Config::load_config(Some(&path))?;
        cleanup_env_vars();

        assert_eq!(config.publisher.throttle_ms, 500);
        assert_eq!(config.publisher.event_size_max, 4096);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.bot.agent_id, "agent-env");
        Ok(())
    }

    #[test]
    #[serial]
    fn test_invalid_environment_value() {
        cleanup_env_vars();
        unsafe {
            env::set_var("RELAYBOT_EVENT_SIZE_MAX", "huge");
        }

        let err = Config::load_config(None).unwrap_err();
        cleanup_env_vars();

        assert!(matches!(err, ConfigError::InvalidEnv { ref variable, .. } if variable == "RELAYBOT_EVENT_SIZE_MAX"));
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config = Config::with_defaults();
        config.publisher.event_size_max = 0;
        config.parser.close_delimiter = config.parser.open_delimiter.clone();
        config.bot.agent_id = "  ".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
