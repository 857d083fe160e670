//! Configuration file loading.
//!
//! ## Responsibility
//! Read a YAML file from disk, parse it into a [`Config`], and run
//! validation before returning. This is the primary entry point for loading
//! agent configuration at startup.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//!
//! ## NOT Responsible For
//! - Defining the config schema (that belongs to `mod.rs`)

use std::path::Path;

use tracing::info;

use super::validation::{self, ConfigError};
use super::Config;

/// Load a [`Config`] from a YAML file.
///
/// Reads the file, parses it as YAML, and validates all semantic
/// constraints.
///
/// # Errors
///
/// - `ConfigError::Io` if the file cannot be read.
/// - `ConfigError::Parse` if the YAML is malformed.
/// - `ConfigError::Validation` if semantic constraints are violated.
pub fn load_from_file(path: &Path) -> Result<Config, ConfigError> {
    info!(path = %path.display(), "loading agent config");
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`Config`] from a YAML string.
///
/// Useful for testing or embedding configs without file I/O.
pub fn load_from_str(content: &str, source_name: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}
