//! Kiln Configuration System
//!
//! Loads the `kiln.toml` project file and turns it into a pipeline
//! configuration for `kiln-build`.
//!
//! # Configuration Hierarchy
//!
//! Later sources override earlier ones:
//! 1. Built-in defaults (`wasm32-unknown-unknown`, `release`, `res/`)
//! 2. Project config (`kiln.toml`, found by walking up from the start directory)
//! 3. Environment variables (`KILN_*`, `CARGO_TARGET_DIR`)
//! 4. CLI flags (applied by the caller)
//!
//! # Example
//!
//! ```no_run
//! use kiln_config::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::new().load_from_directory(Path::new(".")).unwrap();
//! let pipeline = config.pipeline_config().unwrap();
//! ```

pub mod loader;
pub mod project;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Invalid value error for `field`
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use loader::{parse_unit_list, Config, ConfigLoader, CONFIG_FILE_NAME};
pub use project::{BuildSection, ProjectConfig, ToolchainSection, UnitSpec};
