//! # Configuration File Loading
//!
//! Loads configuration from TOML or YAML files, detecting the format from
//! the file extension.

use crate::config::Config;
use crate::error::ConfigError;
use std::path::Path;
use validator::Validate;

/// Configuration file loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(String),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(String),

    #[error("Config file has no extension")]
    NoExtension,

    #[error("Unsupported config file format: {0}")]
    UnsupportedFormat(String),
}

/// Load configuration from a TOML file. Missing sections keep defaults.
pub fn load_from_toml(path: &Path) -> Result<Config, ConfigFileError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_e| ConfigFileError::FileNotFound(path.display().to_string()))?;

    toml::from_str(&contents).map_err(|e| ConfigFileError::TomlParse(e.to_string()))
}

/// Load configuration from a YAML file. Missing sections keep defaults.
pub fn load_from_yaml(path: &Path) -> Result<Config, ConfigFileError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_e| ConfigFileError::FileNotFound(path.display().to_string()))?;

    serde_yaml::from_str(&contents).map_err(|e| ConfigFileError::YamlParse(e.to_string()))
}

/// Load and validate configuration from file with auto-detection.
///
/// # M-CANONICAL-DOCS
///
/// ## Supported Formats
/// - `.toml`: TOML format
/// - `.yaml` / `.yml`: YAML format
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_file;
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_from_file(Path::new("mk.toml"))?;
///     println!("Namespace: {}", config.sync.namespace_id);
///     Ok(())
/// }
/// ```
///
/// ## Error Handling
/// - `ConfigError::File` for unreadable, unparseable or unsupported files
/// - `ConfigError::Validation` for out-of-range values
pub fn load_from_file(path: &Path) -> Result<Config, ConfigError> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or(ConfigFileError::NoExtension)?;

    let config = match extension.to_lowercase().as_str() {
        "toml" => load_from_toml(path)?,
        "yaml" | "yml" => load_from_yaml(path)?,
        other => return Err(ConfigFileError::UnsupportedFormat(other.to_string()).into()),
    };

    config.validate()?;
    Ok(config)
}
