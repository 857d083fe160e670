//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`Config`] that cannot be
//! expressed through the type system alone (required-when constraints,
//! provider-specific fields, log level names).
//!
//! ## Guarantees
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing YAML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::{Config, FaasKind};

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// YAML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying YAML deserialization error.
        #[source]
        source: serde_yaml::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has a missing, out-of-range, or contradictory value.
    #[error("Field '{field}' has invalid value '{value}': {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "faas.host").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate all semantic constraints on a [`Config`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Agent identity ───────────────────────────────────────────────
    if config.agent.host.trim().is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "agent.host".into(),
            value: String::new(),
            reason: "agent host must not be empty".into(),
        });
    }

    // ── Provider-specific fields ─────────────────────────────────────
    match config.faas.kind {
        FaasKind::Tinyfaas => {
            if config.faas.host.as_deref().unwrap_or("").trim().is_empty() {
                errors.push(ConfigError::InvalidField {
                    field: "faas.host".into(),
                    value: String::new(),
                    reason: "tinyfaas requires a management host".into(),
                });
            }
            if config.faas.port.is_none() {
                errors.push(ConfigError::InvalidField {
                    field: "faas.port".into(),
                    value: String::new(),
                    reason: "tinyfaas requires a management port".into(),
                });
            }
            if config
                .faas
                .proxy_host
                .as_deref()
                .unwrap_or("")
                .trim()
                .is_empty()
            {
                errors.push(ConfigError::InvalidField {
                    field: "faas.proxyHost".into(),
                    value: String::new(),
                    reason: "tinyfaas requires the host functions are reachable under".into(),
                });
            }
        }
        FaasKind::Gcp => {
            if config.faas.project_id.as_deref().unwrap_or("").is_empty() {
                errors.push(ConfigError::InvalidField {
                    field: "faas.projectID".into(),
                    value: String::new(),
                    reason: "gcp requires a project identifier".into(),
                });
            }
            if config.faas.location.as_deref().unwrap_or("").is_empty() {
                errors.push(ConfigError::InvalidField {
                    field: "faas.location".into(),
                    value: String::new(),
                    reason: "gcp requires a region".into(),
                });
            }
        }
    }

    // ── Log level ────────────────────────────────────────────────────
    if !LOG_LEVELS.contains(&config.log_level.to_lowercase().as_str()) {
        errors.push(ConfigError::InvalidField {
            field: "logLevel".into(),
            value: config.log_level.clone(),
            reason: format!("must be one of {LOG_LEVELS:?}"),
        });
    }

    // ── Mode selection ───────────────────────────────────────────────
    if config.strategy_path.is_none() && config.parent.is_none() {
        errors.push(ConfigError::InvalidField {
            field: "parent".into(),
            value: String::new(),
            reason: "either strategyPath or a parent endpoint must be configured".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{AgentConfig, FaasConfig, ParentConfig};
    use super::*;

    fn tinyfaas_config() -> Config {
        Config {
            strategy_path: Some("strategies/sieve.yml".into()),
            faas: FaasConfig {
                kind: FaasKind::Tinyfaas,
                host: Some("localhost".into()),
                port: Some(8080),
                proxy_host: Some("host.docker.internal".into()),
                project_id: None,
                location: None,
                credentials: None,
            },
            agent: AgentConfig {
                host: "172.17.0.1".into(),
                service_area: String::new(),
            },
            parent: None,
            log_level: "info".into(),
        }
    }

    #[test]
    fn test_validate_accepts_complete_tinyfaas_config() {
        assert!(validate(&tinyfaas_config()).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_agent_host() {
        let mut cfg = tinyfaas_config();
        cfg.agent.host = "  ".into();
        let errors = validate(&cfg).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("agent.host")));
    }

    #[test]
    fn test_validate_rejects_tinyfaas_without_management_endpoint() {
        let mut cfg = tinyfaas_config();
        cfg.faas.host = None;
        cfg.faas.port = None;
        let errors = validate(&cfg).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_validate_rejects_gcp_without_project() {
        let mut cfg = tinyfaas_config();
        cfg.faas.kind = FaasKind::Gcp;
        cfg.faas.project_id = None;
        cfg.faas.location = Some("europe-west10".into());
        let errors = validate(&cfg).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("projectID")));
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut cfg = tinyfaas_config();
        cfg.log_level = "verbose".into();
        let errors = validate(&cfg).unwrap_err();
        assert!(errors.iter().any(|e| e.to_string().contains("logLevel")));
    }

    #[test]
    fn test_validate_requires_strategy_or_parent() {
        let mut cfg = tinyfaas_config();
        cfg.strategy_path = None;
        cfg.parent = None;
        let errors = validate(&cfg).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("strategyPath")));

        cfg.parent = Some(ParentConfig {
            host: "localhost".into(),
            port: 8010,
        });
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_validate_collects_multiple_errors() {
        let mut cfg = tinyfaas_config();
        cfg.agent.host = String::new();
        cfg.log_level = "verbose".into();
        let errors = validate(&cfg).unwrap_err();
        assert!(errors.len() >= 2);
    }
}
