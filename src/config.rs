//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`AppConfig::default`])
//! 2. A TOML file (`config/kesf.toml` unless another path is given)
//! 3. Environment variables prefixed with `KESF_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use kesf_daq::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("Baud rate: {}", config.serial.baud_rate);
//! # Ok::<(), kesf_daq::error::DaqError>(())
//! ```

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/kesf.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial line settings shared by both boards
    #[serde(default)]
    pub serial: SerialConfig,
    /// Acquisition loop settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Archive output settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Window / process title
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Serial line configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Baud rate used for both boards
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// How long a write may wait for the device before failing
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    /// Pre-selected port of the control board (displacement + timestamp, motor commands)
    #[serde(default)]
    pub control_port: Option<String>,
    /// Pre-selected port of the sensor board (sensor + two forces)
    #[serde(default)]
    pub sensor_port: Option<String>,
}

/// Acquisition loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Number of poll ticks after which a run stops on its own
    #[serde(default = "default_max_run_length")]
    pub max_run_length: u64,
}

/// Archive output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory the CSV archives are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// chrono format string for the suggested file stem
    #[serde(default = "default_file_stem_format")]
    pub file_stem_format: String,
}

fn default_name() -> String {
    "KES-F System".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_write_timeout() -> u64 {
    1000
}

fn default_max_run_length() -> u64 {
    1 << 20
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_file_stem_format() -> String {
    "%Y-%m%d-%H%M-project".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            write_timeout_ms: default_write_timeout(),
            control_port: None,
            sensor_port: None,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            max_run_length: default_max_run_length(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_stem_format: default_file_stem_format(),
        }
    }
}

impl SerialConfig {
    /// Write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl AppConfig {
    /// Load configuration from `config/kesf.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `KESF_`.
    /// Example: `KESF_SERIAL__BAUD_RATE=9600`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: AppConfig = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("KESF_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(DaqError::Config("baud_rate must be positive".into()));
        }

        if self.serial.write_timeout_ms == 0 {
            return Err(DaqError::Config("write_timeout_ms must be positive".into()));
        }

        if self.acquisition.max_run_length <= 1 {
            return Err(DaqError::Config(format!(
                "Invalid max_run_length {}. Must be greater than 1",
                self.acquisition.max_run_length
            )));
        }

        crate::storage::check_file_stem_format(&self.storage.file_stem_format)?;

        Ok(())
    }
}
