//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load the TOML configuration of a
//! HAL core process: the shared service section, the arena geometry and the
//! scheduler defaults.
//!
//! # Usage
//!
//! ```rust,no_run
//! use hal_common::config::{ConfigLoader, HalConfig, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = HalConfig::load(Path::new("hal.toml"))?;
//!     config.validate()?;
//!     println!("Arena: {} ({} bytes)", config.arena.name, config.arena.size);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    ARENA_DEFAULT_SIZE, ARENA_MAX_SIZE, ARENA_MIN_SIZE, DEFAULT_ARENA_NAME, DEFAULT_SHM_DIR,
    HAL_NAME_LEN, MAX_EPSILON, PAGE_SIZE,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Represents the verbosity level of logging output.
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

/// Common configuration fields shared across all HAL processes.
///
/// This struct should be embedded in application-specific configuration
/// structs to provide consistent base configuration.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "hal-rt-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `service_name` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: "hal".to_string(),
        }
    }
}

/// Geometry and location of the HAL arena.
///
/// # TOML Example
///
/// ```toml
/// [arena]
/// name = "hal"
/// size = 1048576
/// shm_dir = "/dev/shm"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Arena name; the backing file is `<shm_dir>/hal_<name>`.
    pub name: String,
    /// Arena size in bytes (page multiple).
    pub size: usize,
    /// Directory holding the arena and ring segment files.
    pub shm_dir: PathBuf,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_ARENA_NAME.to_string(),
            size: ARENA_DEFAULT_SIZE,
            shm_dir: PathBuf::from(DEFAULT_SHM_DIR),
        }
    }
}

impl ArenaConfig {
    /// Arena config for a given directory, default name and size.
    pub fn in_dir(shm_dir: impl Into<PathBuf>) -> Self {
        Self {
            shm_dir: shm_dir.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `name` is empty, too long or contains a path separator
    /// - `size` is outside the accepted range or not page aligned
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.len() > HAL_NAME_LEN || self.name.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "invalid arena name '{}'",
                self.name
            )));
        }
        if self.size < ARENA_MIN_SIZE || self.size > ARENA_MAX_SIZE || self.size % PAGE_SIZE != 0 {
            return Err(ConfigError::ValidationError(format!(
                "arena size {} must be a page multiple in {}..={}",
                self.size, ARENA_MIN_SIZE, ARENA_MAX_SIZE
            )));
        }
        Ok(())
    }
}

/// Scheduler defaults written into a freshly created arena.
///
/// # TOML Example
///
/// ```toml
/// [scheduler]
/// base_period_ns = 1000000
/// exact_base_period = false
/// epsilon = [0.00001, 0.001]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Base tick length in nanoseconds; 0 lets the first thread define it.
    pub base_period_ns: i64,
    /// Pretend the requested base period was met exactly.
    pub exact_base_period: bool,
    /// Overrides for the leading entries of the epsilon table.
    pub epsilon: Vec<f64>,
}

impl SchedulerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `base_period_ns` is negative
    /// - more than `MAX_EPSILON` epsilon values are given, or one is negative
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_period_ns < 0 {
            return Err(ConfigError::ValidationError(
                "base_period_ns cannot be negative".to_string(),
            ));
        }
        if self.epsilon.len() > MAX_EPSILON {
            return Err(ConfigError::ValidationError(format!(
                "at most {} epsilon values allowed, got {}",
                MAX_EPSILON,
                self.epsilon.len()
            )));
        }
        if self.epsilon.iter().any(|e| !e.is_finite() || *e < 0.0) {
            return Err(ConfigError::ValidationError(
                "epsilon values must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete configuration of a HAL core process.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "hal"
///
/// [arena]
/// size = 2097152
///
/// [scheduler]
/// base_period_ns = 50000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HalConfig {
    /// Common service fields.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Arena geometry.
    #[serde(default)]
    pub arena: ArenaConfig,
    /// Scheduler defaults.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl HalConfig {
    /// Default configuration with the arena placed in `shm_dir`.
    pub fn in_dir(shm_dir: impl Into<PathBuf>) -> Self {
        Self {
            arena: ArenaConfig::in_dir(shm_dir),
            ..Self::default()
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.arena.validate()?;
        self.scheduler.validate()
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
/// - Returns `ConfigError::ValidationError` if semantic validation fails
///
/// # Example
///
/// ```rust,no_run
/// use hal_common::config::{ConfigLoader, SharedConfig, ConfigError};
/// use serde::Deserialize;
/// use std::path::Path;
///
/// #[derive(Debug, Deserialize)]
/// struct AppConfig {
///     shared: SharedConfig,
/// }
///
/// fn main() -> Result<(), ConfigError> {
///     let config = AppConfig::load(Path::new("config.toml"))?;
///     Ok(())
/// }
/// ```
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - Successfully loaded and parsed configuration
    /// * `Err(ConfigError)` - Loading or parsing failed
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
// This allows any serde-deserializable struct to use ConfigLoader.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_log_level_serialization() {
        // Test serialization within a struct (TOML requires a table)
        #[derive(Serialize)]
        struct TestWrapper {
            level: LogLevel,
        }

        let wrapper = TestWrapper {
            level: LogLevel::Trace,
        };
        assert!(toml::to_string(&wrapper).unwrap().contains("trace"));

        let wrapper = TestWrapper {
            level: LogLevel::Debug,
        };
        assert!(toml::to_string(&wrapper).unwrap().contains("debug"));

        let wrapper = TestWrapper {
            level: LogLevel::Info,
        };
        assert!(toml::to_string(&wrapper).unwrap().contains("info"));

        let wrapper = TestWrapper {
            level: LogLevel::Warn,
        };
        assert!(toml::to_string(&wrapper).unwrap().contains("warn"));

        let wrapper = TestWrapper {
            level: LogLevel::Error,
        };
        assert!(toml::to_string(&wrapper).unwrap().contains("error"));
    }

    #[test]
    fn test_log_level_deserialization() {
        // Test deserialization within a struct (TOML requires a table)
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"trace\"")
                .unwrap()
                .level,
            LogLevel::Trace
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"debug\"")
                .unwrap()
                .level,
            LogLevel::Debug
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"info\"")
                .unwrap()
                .level,
            LogLevel::Info
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"warn\"")
                .unwrap()
                .level,
            LogLevel::Warn
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"error\"")
                .unwrap()
                .level,
            LogLevel::Error
        );
    }

    #[test]
    fn test_shared_config_validation_success() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "test-service".to_string(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shared_config_validation_empty_service_name() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "".to_string(),
        };
        let result = config.validate();
        assert!(result.is_err());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_config_loader_file_not_found() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct TestConfig {
            value: String,
        }

        let result = TestConfig::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_parse_error() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct TestConfig {
            value: String,
        }

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid toml {{{{").unwrap();

        let result = TestConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_config_loader_success() {
        #[derive(Debug, Deserialize)]
        struct TestConfig {
            shared: SharedConfig,
            port: u16,
        }

        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"port = 8080

[shared]
log_level = "debug"
service_name = "test-service"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = TestConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.shared.service_name, "test-service");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_hal_config_defaults_validate() {
        let config = HalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.arena.size, ARENA_DEFAULT_SIZE);
        assert_eq!(config.arena.shm_dir, PathBuf::from(DEFAULT_SHM_DIR));
    }

    #[test]
    fn test_arena_config_rejects_unaligned_size() {
        let mut config = ArenaConfig::default();
        config.size = ARENA_MIN_SIZE + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
        config.size = ARENA_MIN_SIZE - PAGE_SIZE;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_arena_config_rejects_path_in_name() {
        let mut config = ArenaConfig::default();
        config.name = "../etc".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scheduler_config_epsilon_limits() {
        let mut config = SchedulerConfig::default();
        config.epsilon = vec![0.1; MAX_EPSILON + 1];
        assert!(config.validate().is_err());
        config.epsilon = vec![0.1, -1.0];
        assert!(config.validate().is_err());
        config.epsilon = vec![0.1, 0.01];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hal_config_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[arena]
size = 2097152

[scheduler]
base_period_ns = 50000
epsilon = [0.001]
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = HalConfig::load(file.path()).unwrap();
        assert_eq!(config.arena.size, 2 * 1024 * 1024);
        assert_eq!(config.arena.name, DEFAULT_ARENA_NAME);
        assert_eq!(config.scheduler.base_period_ns, 50_000);
        assert_eq!(config.scheduler.epsilon, vec![0.001]);
        assert_eq!(config.shared.service_name, "hal");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_shared_config_default_log_level() {
        #[derive(Debug, Deserialize)]
        struct TestConfig {
            shared: SharedConfig,
        }

        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[shared]
service_name = "test-service"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = TestConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Info); // Default
    }
}
