//! Strategy file loading.
//!
//! ## Responsibility
//! Read a release strategy YAML file from disk, parse it into a
//! [`ReleaseStrategy`], and run validation before returning.
//!
//! ## Guarantees
//! - A successfully loaded strategy satisfies every invariant in
//!   [`validation`](super::validation)
//! - I/O errors and parse errors are distinguished in the error type

use std::path::Path;

use tracing::{debug, info};

use super::validation::{self, StrategyError};
use super::ReleaseStrategy;

/// Load a [`ReleaseStrategy`] from a YAML file.
///
/// # Errors
///
/// - `StrategyError::Io` if the file cannot be read.
/// - `StrategyError::Parse` if the YAML is malformed.
/// - `StrategyError::Validation` if any load-time invariant fails.
pub fn load_from_file(path: &Path) -> Result<ReleaseStrategy, StrategyError> {
    let content = std::fs::read_to_string(path).map_err(|e| StrategyError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`ReleaseStrategy`] from a YAML string.
pub fn load_from_str(content: &str, source_name: &str) -> Result<ReleaseStrategy, StrategyError> {
    let strategy: ReleaseStrategy =
        serde_yaml::from_str(content).map_err(|e| StrategyError::Parse {
            file: source_name.to_string(),
            source: e,
        })?;

    validation::validate(&strategy).map_err(|errors| {
        StrategyError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    let stage_names: Vec<&str> = strategy.stages.iter().map(|s| s.name.as_str()).collect();
    info!(
        strategy = %strategy.name,
        kind = %strategy.kind,
        stages = ?stage_names,
        "using release strategy"
    );
    debug!(?strategy, "strategy dump");

    Ok(strategy)
}
