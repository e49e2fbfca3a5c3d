//! Configuration types for the Rubric grading service.
//!
//! Configuration lives in a camelCase `rubric.json`. Every field has a
//! default, unknown fields are ignored, and a missing file yields the
//! defaults. Values are checked by [`Config::validate`] after parsing.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use rubric_grading::{ClientConfig, SchemaVariant};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RubricError};
use crate::progression::{
    default_levels, LevelTable, LevelThreshold, DEFAULT_ACCELERATED_BELOW_LEVEL,
};
use crate::rate_limit::{DEFAULT_CAPACITY, DEFAULT_WINDOW};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "rubric.json";

/// Default bind address.
fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Default listening port.
const fn default_port() -> u16 {
    3000
}

/// Default rate-limit window in seconds.
const fn default_window_seconds() -> u64 {
    DEFAULT_WINDOW.as_secs()
}

/// Default requests per window.
const fn default_max_requests() -> u32 {
    DEFAULT_CAPACITY
}

/// Default completion service base URL.
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// Default environment variable holding the completion API key.
fn default_api_key_env() -> String {
    "RUBRIC_LLM_API_KEY".to_string()
}

/// Default completion model.
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Default completion timeout in seconds.
const fn default_timeout_seconds() -> u64 {
    45
}

/// Default sampling temperature.
const fn default_temperature() -> f32 {
    0.2
}

/// Default level below which awards are accelerated.
const fn default_accelerated_below_level() -> u32 {
    DEFAULT_ACCELERATED_BELOW_LEVEL
}

/// Default SQLite database path.
fn default_database_path() -> String {
    "rubric.db".to_string()
}

/// Default value for boolean options that default to true.
const fn default_true() -> bool {
    true
}

/// Main configuration for the Rubric service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-client admission window.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Completion service settings.
    #[serde(default)]
    pub grading: GradingConfig,

    /// XP and level settings.
    #[serde(default)]
    pub progression: ProgressionConfig,

    /// Development bearer tokens.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Datastore location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Serialize concurrent grading of the same submission in-process.
    #[serde(default = "default_true")]
    pub serialize_submissions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            grading: GradingConfig::default(),
            progression: ProgressionConfig::default(),
            auth: AuthConfig::default(),
            database: DatabaseConfig::default(),
            serialize_submissions: default_true(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `rubric.json` in the current directory. If not found,
    /// returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            RubricError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `rubric.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is invalid.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `RubricError::ConfigParseError` if the file cannot be read or
    /// is not valid JSON, and `RubricError::ConfigValidationError` if the
    /// values are invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(RubricError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| RubricError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `RubricError::ConfigValidationError` for the first failing check.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.window_seconds == 0 {
            return Err(RubricError::config_validation(
                "rateLimit.windowSeconds must be greater than 0",
                "Set rateLimit.windowSeconds to at least 1 in your rubric.json",
            ));
        }

        if self.rate_limit.max_requests == 0 {
            return Err(RubricError::config_validation(
                "rateLimit.maxRequests must be greater than 0",
                "Set rateLimit.maxRequests to at least 1 in your rubric.json",
            ));
        }

        if self.grading.timeout_seconds == 0 {
            return Err(RubricError::config_validation(
                "grading.timeoutSeconds must be greater than 0",
                "Set grading.timeoutSeconds to at least 1 second in your rubric.json",
            ));
        }

        if self.grading.model.trim().is_empty() {
            return Err(RubricError::config_validation(
                "grading.model must not be empty",
                "Name the completion model in grading.model in your rubric.json",
            ));
        }

        if self.grading.base_url.trim().is_empty() {
            return Err(RubricError::config_validation(
                "grading.baseUrl must not be empty",
                "Set grading.baseUrl to an OpenAI-compatible endpoint in your rubric.json",
            ));
        }

        if !(0.0..=2.0).contains(&self.grading.temperature) {
            return Err(RubricError::config_validation(
                "grading.temperature must be between 0 and 2",
                "Set grading.temperature to a value such as 0.2 in your rubric.json",
            ));
        }

        if self.progression.accelerated_below_level < 1 {
            return Err(RubricError::config_validation(
                "progression.acceleratedBelowLevel must be at least 1",
                "Set progression.acceleratedBelowLevel to 1 to disable acceleration",
            ));
        }

        if self.database.path.trim().is_empty() {
            return Err(RubricError::config_validation(
                "database.path must not be empty",
                "Provide a database file path in your rubric.json (use ':memory:' for an ephemeral store)",
            ));
        }

        self.progression.level_table()?;
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Sliding-window rate limit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Window length in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Requests admitted per window and client.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            max_requests: default_max_requests(),
        }
    }
}

impl RateLimitConfig {
    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingConfig {
    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Completion timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Output schema requested from the service.
    #[serde(default)]
    pub schema_variant: SchemaVariant,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            timeout_seconds: default_timeout_seconds(),
            temperature: default_temperature(),
            schema_variant: SchemaVariant::default(),
        }
    }
}

impl GradingConfig {
    /// Completion timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Reads the API key from the configured environment variable.
    ///
    /// An unset or empty variable yields `None`.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// Client settings for [`rubric_grading::OpenAiCompatClient`].
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: self.api_key(),
        }
    }
}

/// XP and level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionConfig {
    /// Users below this level receive the maximum XP per award.
    #[serde(default = "default_accelerated_below_level")]
    pub accelerated_below_level: u32,

    /// Level thresholds, ascending.
    #[serde(default = "default_levels")]
    pub levels: Vec<LevelThreshold>,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            accelerated_below_level: default_accelerated_below_level(),
            levels: default_levels(),
        }
    }
}

impl ProgressionConfig {
    /// Validated level table.
    ///
    /// # Errors
    ///
    /// Returns `RubricError::ConfigValidationError` for an empty or unsorted table.
    pub fn level_table(&self) -> Result<LevelTable> {
        LevelTable::new(self.levels.clone())
    }
}

/// Development bearer tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Token → user id.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

/// Datastore location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.rate_limit.window_seconds, 60);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.grading.timeout_seconds, 45);
        assert_eq!(config.grading.api_key_env, "RUBRIC_LLM_API_KEY");
        assert_eq!(config.grading.schema_variant, SchemaVariant::Supplied);
        assert_eq!(config.progression.accelerated_below_level, 6);
        assert_eq!(config.progression.levels.len(), 10);
        assert_eq!(config.database.path, "rubric.db");
        assert!(config.auth.tokens.is_empty());
        assert!(config.serialize_submissions);
    }

    #[test]
    fn test_serialize_submissions_defaults_true() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.serialize_submissions);
        let config: Config = serde_json::from_str(r#"{"serializeSubmissions": false}"#).unwrap();
        assert!(!config.serialize_submissions);
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "server": {"port": 8080},
            "rateLimit": {"windowSeconds": 10, "maxRequests": 2},
            "grading": {"model": "local-model", "schemaVariant": "derived", "timeoutSeconds": 5},
            "progression": {
                "acceleratedBelowLevel": 3,
                "levels": [{"level": 1, "xpThreshold": 0}, {"level": 2, "xpThreshold": 10}]
            },
            "auth": {"tokens": {"dev-token": "user-1"}},
            "database": {"path": ":memory:"}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.rate_limit.window(), Duration::from_secs(10));
        assert_eq!(config.rate_limit.max_requests, 2);
        assert_eq!(config.grading.model, "local-model");
        assert_eq!(config.grading.schema_variant, SchemaVariant::Derived);
        assert_eq!(config.grading.timeout(), Duration::from_secs(5));
        assert_eq!(config.progression.accelerated_below_level, 3);
        assert_eq!(config.progression.level_table().unwrap().level_for(12), 2);
        assert_eq!(config.auth.tokens.get("dev-token").unwrap(), "user-1");
        assert_eq!(config.database.path, ":memory:");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_schema_variant_error() {
        let json = r#"{"grading": {"schemaVariant": "freeform"}}"#;
        let err = serde_json::from_str::<Config>(json).unwrap_err().to_string();
        assert!(err.contains("freeform"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{
            "server": {"port": 4000, "tls": true},
            "unknownField": "should be ignored"
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn test_load_from_file_valid_json() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_rubric_valid.json");
        let json = r#"{"rateLimit": {"maxRequests": 9}}"#;
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.rate_limit.max_requests, 9);
        assert_eq!(config.rate_limit.window_seconds, 60);

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_rubric_invalid.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(b"{ not valid json }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, RubricError::ConfigParseError { path, message } if *path == config_path && !message.is_empty()),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let config = Config::load_from_file(&PathBuf::from("/nonexistent/path/rubric.json")).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.grading.timeout_seconds, 45);
    }

    #[test]
    fn test_load_from_dir_finds_rubric_json() {
        use std::io::Write;

        let temp_dir = std::env::temp_dir().join("test_rubric_dir");
        std::fs::create_dir_all(&temp_dir).unwrap();
        let config_path = temp_dir.join("rubric.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(br#"{"server": {"port": 9100}}"#).unwrap();

        let config = Config::load_from_dir(&temp_dir).unwrap();
        assert_eq!(config.server.port, 9100);

        std::fs::remove_file(&config_path).ok();
        std::fs::remove_dir(&temp_dir).ok();
    }

    #[test]
    fn test_load_from_file_validates_after_parsing() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_rubric_validation.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(br#"{"rateLimit": {"maxRequests": 0}}"#).unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, RubricError::ConfigValidationError { .. }),
            "Expected ConfigValidationError, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_config_validation_zero_window() {
        let config = Config {
            rate_limit: RateLimitConfig {
                window_seconds: 0,
                ..Default::default()
            },
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, RubricError::ConfigValidationError { message, suggestion }
                if message.contains("windowSeconds") && suggestion.contains("windowSeconds")),
            "Expected ConfigValidationError about windowSeconds, got: {err:?}"
        );
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let config = Config {
            grading: GradingConfig {
                timeout_seconds: 0,
                ..Default::default()
            },
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, RubricError::ConfigValidationError { message, .. }
                if message.contains("timeoutSeconds")),
            "Expected ConfigValidationError about timeoutSeconds, got: {err:?}"
        );
    }

    #[test]
    fn test_config_validation_empty_model() {
        let config = Config {
            grading: GradingConfig {
                model: "  ".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_unsorted_levels() {
        let config = Config {
            progression: ProgressionConfig {
                levels: vec![LevelThreshold::new(1, 100), LevelThreshold::new(2, 0)],
                ..Default::default()
            },
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, RubricError::ConfigValidationError { message, .. }
                if message.contains("progression.levels")),
            "Expected ConfigValidationError about progression.levels, got: {err:?}"
        );
    }

    #[test]
    fn test_config_validation_accelerated_level_zero() {
        let config = Config {
            progression: ProgressionConfig {
                accelerated_below_level: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_from_missing_env_is_none() {
        let grading = GradingConfig {
            api_key_env: "RUBRIC_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..Default::default()
        };
        assert_eq!(grading.api_key(), None);
        assert_eq!(grading.client_config().api_key, None);
    }
}
