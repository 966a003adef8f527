//! Configuration management with hierarchical overrides.
//!
//! Supports multiple configuration sources with precedence:
//! 1. Environment variables (`FLEETWATCH_*`, highest precedence)
//! 2. User configuration file (`~/.config/fleetwatch/config.yaml`)
//! 3. System configuration file (`/etc/fleetwatch/config.yaml`)
//! 4. Embedded defaults (lowest precedence)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration format: {0}")]
    InvalidFormat(#[from] serde_yaml::Error),

    #[error("IO error reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

/// Main configuration structure for FleetWatch components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Edge agent runtime configuration
    pub agent: AgentConfig,
    /// Upstream connectivity configuration
    pub connectivity: ConnectivityConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Edge agent runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// Capacity of the signal ingress queue
    pub signal_queue_capacity: usize,
    /// Capacity of the publish queue
    pub publish_queue_capacity: usize,
    /// Worker sleep when no data arrives, in milliseconds
    pub idle_time_ms: u64,
}

/// Upstream connectivity configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectivityConfig {
    /// MQTT topic telemetry payloads are published to
    pub telemetry_topic: String,
    /// Stop handing payloads to the SDK beyond this heap usage
    pub max_sdk_heap_bytes: u64,
    /// Maximum number of payloads the in-memory spool retains
    pub spool_capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, human)
    pub format: String,
    /// Log file path (optional, stdout if not specified)
    pub file: Option<PathBuf>,
    /// Enable structured logging
    pub structured: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            signal_queue_capacity: 10_000,
            publish_queue_capacity: 1_000,
            idle_time_ms: 50,
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            telemetry_topic: "fleetwatch/vehicle/telemetry".to_string(),
            max_sdk_heap_bytes: 10_000_000,
            spool_capacity: 1_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "human".to_string(),
            file: None,
            structured: false,
        }
    }
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration loader with hierarchical override support.
pub struct ConfigLoader {
    component: String,
    system_path: PathBuf,
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new configuration loader for the specified component.
    pub fn new(component: &str) -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            component: component.to_string(),
            system_path: PathBuf::from("/etc/fleetwatch/config.yaml"),
            user_path: PathBuf::from(home).join(".config/fleetwatch/config.yaml"),
        }
    }

    /// Override the file locations, mainly for tests.
    pub fn with_paths(mut self, system_path: PathBuf, user_path: PathBuf) -> Self {
        self.system_path = system_path;
        self.user_path = user_path;
        self
    }

    /// Load configuration with hierarchical overrides.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        // Load from system configuration file
        if let Ok(system_config) = self.load_file(&self.system_path) {
            config = self.merge_configs(config, system_config);
        }

        // Load from user configuration file
        if let Ok(user_config) = self.load_file(&self.user_path) {
            config = self.merge_configs(config, user_config);
        }

        // Apply environment variable overrides
        config = self.apply_env_overrides(config);

        // Validate final configuration
        config.validate()?;

        Ok(config)
    }

    fn load_file(&self, path: &PathBuf) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound { path: path.clone() });
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&self, mut config: Config) -> Config {
        let prefix = format!("FLEETWATCH_{}", self.component.to_uppercase());

        if let Ok(val) = std::env::var(format!("{prefix}_SIGNAL_QUEUE_CAPACITY")) {
            if let Ok(capacity) = val.parse() {
                config.agent.signal_queue_capacity = capacity;
            }
        }

        if let Ok(val) = std::env::var(format!("{prefix}_PUBLISH_QUEUE_CAPACITY")) {
            if let Ok(capacity) = val.parse() {
                config.agent.publish_queue_capacity = capacity;
            }
        }

        if let Ok(val) = std::env::var(format!("{prefix}_IDLE_TIME_MS")) {
            if let Ok(idle) = val.parse() {
                config.agent.idle_time_ms = idle;
            }
        }

        if let Ok(val) = std::env::var(format!("{prefix}_TELEMETRY_TOPIC")) {
            config.connectivity.telemetry_topic = val;
        }

        if let Ok(val) = std::env::var(format!("{prefix}_MAX_SDK_HEAP_BYTES")) {
            if let Ok(bytes) = val.parse() {
                config.connectivity.max_sdk_heap_bytes = bytes;
            }
        }

        if let Ok(val) = std::env::var(format!("{prefix}_LOG_LEVEL")) {
            config.logging.level = val;
        }

        if let Ok(val) = std::env::var(format!("{prefix}_LOG_FORMAT")) {
            config.logging.format = val;
        }

        config
    }

    /// Merge two configurations, with the second taking precedence.
    fn merge_configs(&self, _base: Config, override_config: Config) -> Config {
        override_config
    }
}

impl Config {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.signal_queue_capacity == 0 {
            return Err(ConfigError::ValidationError {
                message: "signal_queue_capacity must be greater than 0".to_string(),
            });
        }

        if self.agent.publish_queue_capacity == 0 {
            return Err(ConfigError::ValidationError {
                message: "publish_queue_capacity must be greater than 0".to_string(),
            });
        }

        if self.agent.idle_time_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "idle_time_ms must be greater than 0".to_string(),
            });
        }

        if self.connectivity.telemetry_topic.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "telemetry_topic cannot be empty".to_string(),
            });
        }

        if self.connectivity.max_sdk_heap_bytes == 0 {
            return Err(ConfigError::ValidationError {
                message: "max_sdk_heap_bytes must be greater than 0".to_string(),
            });
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError {
                message: format!("invalid log level: {}", self.logging.level),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.signal_queue_capacity, 10_000);
        assert_eq!(config.agent.publish_queue_capacity, 1_000);
        assert_eq!(config.connectivity.max_sdk_heap_bytes, 10_000_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.agent.signal_queue_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.agent.idle_time_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.connectivity.telemetry_topic = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_with_missing_files_uses_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let loader = ConfigLoader::new("agent").with_paths(
            dir.path().join("missing-system.yaml"),
            dir.path().join("missing-user.yaml"),
        );

        let config = loader.load().expect("load defaults");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_user_file_overrides_system_file() {
        let dir = TempDir::new().expect("temp dir");

        let system_path = dir.path().join("system.yaml");
        let mut system = std::fs::File::create(&system_path).expect("create");
        write!(
            system,
            "agent:\n  signal_queue_capacity: 500\n  publish_queue_capacity: 100\n  idle_time_ms: 20\n\
             connectivity:\n  telemetry_topic: sys/topic\n  max_sdk_heap_bytes: 1000\n  spool_capacity: 10\n\
             logging:\n  level: warn\n  format: human\n  structured: false\n"
        )
        .expect("write");

        let user_path = dir.path().join("user.yaml");
        let mut user = std::fs::File::create(&user_path).expect("create");
        write!(
            user,
            "agent:\n  signal_queue_capacity: 700\n  publish_queue_capacity: 100\n  idle_time_ms: 20\n\
             connectivity:\n  telemetry_topic: user/topic\n  max_sdk_heap_bytes: 1000\n  spool_capacity: 10\n\
             logging:\n  level: debug\n  format: human\n  structured: false\n"
        )
        .expect("write");

        let loader = ConfigLoader::new("agent").with_paths(system_path, user_path);
        let config = loader.load().expect("load");

        assert_eq!(config.agent.signal_queue_capacity, 700);
        assert_eq!(config.connectivity.telemetry_topic, "user/topic");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_invalid_file_level_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let user_path = dir.path().join("user.yaml");
        let mut user = std::fs::File::create(&user_path).expect("create");
        write!(
            user,
            "agent:\n  signal_queue_capacity: 700\n  publish_queue_capacity: 100\n  idle_time_ms: 20\n\
             connectivity:\n  telemetry_topic: user/topic\n  max_sdk_heap_bytes: 1000\n  spool_capacity: 10\n\
             logging:\n  level: shouting\n  format: human\n  structured: false\n"
        )
        .expect("write");

        let loader = ConfigLoader::new("agent")
            .with_paths(dir.path().join("missing.yaml"), user_path);
        assert!(matches!(
            loader.load(),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).expect("serialize");
        let parsed: Config = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(parsed, config);
    }
}
