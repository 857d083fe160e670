//! # Agent configuration
//!
//! ## Responsibility
//! Define the YAML configuration schema for one agent process: which FaaS
//! provider to drive, where the agent itself is reachable, where the parent
//! controller lives, and (optionally) a local strategy file for one-shot
//! runs.
//!
//! ## Guarantees
//! - Deterministic: the same YAML input always produces the same `Config`
//! - Validated: semantic constraints are checked before a config is accepted
//! - Type-safe: invalid field combinations are caught at parse time via serde
//!
//! ## NOT Responsible For
//! - Parsing the release strategy file (that belongs to `strategy`)
//! - Driving the release (that belongs to `release`)

pub mod loader;
pub mod validation;

use serde::{Deserialize, Serialize};

pub use loader::{load_from_file, load_from_str};
pub use validation::ConfigError;

/// Default log level when `logLevel` is omitted.
fn default_log_level() -> String {
    "info".to_string()
}

/// Root configuration for an agent instance.
///
/// Deserialized from a YAML file and validated before use.
///
/// # Example
///
/// ```yaml
/// strategyPath: strategies/sieve.yml
/// faas:
///   type: tinyfaas
///   host: localhost
///   port: 8080
///   proxyHost: host.docker.internal
/// agent:
///   host: 172.17.0.1
/// parent:
///   host: localhost
///   port: 8010
/// logLevel: info
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Path to a local strategy file. When set, the agent runs that plan
    /// once and exits; when absent, it polls the parent for plans.
    #[serde(rename = "strategyPath", default)]
    pub strategy_path: Option<String>,
    /// FaaS provider selection and connection details.
    pub faas: FaasConfig,
    /// Where this agent is reachable (the proxy reports metrics here).
    pub agent: AgentConfig,
    /// Parent controller endpoint. Required for hierarchical mode and for
    /// uploading stage summaries.
    #[serde(default)]
    pub parent: Option<ParentConfig>,
    /// Log level: debug, info, warn, or error.
    #[serde(rename = "logLevel", default = "default_log_level")]
    pub log_level: String,
}

/// Supported FaaS providers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FaasKind {
    /// Local container-based provider driven over its management API.
    Tinyfaas,
    /// Google Cloud Functions. The capability set is defined; the concrete
    /// adapter is not part of this crate.
    Gcp,
}

/// FaaS provider connection details.
///
/// Which fields are required depends on `type`; see [`validation`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaasConfig {
    /// Provider selector.
    #[serde(rename = "type")]
    pub kind: FaasKind,
    /// Management API host (tinyfaas).
    #[serde(default)]
    pub host: Option<String>,
    /// Management API port (tinyfaas).
    #[serde(default)]
    pub port: Option<u16>,
    /// Host under which deployed functions are reachable from inside the
    /// provider's network, e.g. `host.docker.internal` (tinyfaas).
    #[serde(rename = "proxyHost", default)]
    pub proxy_host: Option<String>,
    /// Cloud project identifier (gcp).
    #[serde(rename = "projectID", default)]
    pub project_id: Option<String>,
    /// Cloud region (gcp).
    #[serde(default)]
    pub location: Option<String>,
    /// Path to provider credentials (gcp).
    #[serde(default)]
    pub credentials: Option<String>,
}

/// The agent's own identity and placement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// Address at which the metric aggregator is reachable for the proxy.
    pub host: String,
    /// GeoJSON FeatureCollection describing the area this agent serves.
    /// Stored verbatim; parsed on demand by [`Config::service_area_polygon`].
    #[serde(default)]
    pub service_area: String,
}

/// Parent controller endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentConfig {
    /// Parent host name or address.
    pub host: String,
    /// Parent port.
    pub port: u16,
}

/// A GeoJSON geometry, kept structurally loose: the `coordinates` payload
/// is passed through to the parent untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Geometry {
    /// GeoJSON geometry type, e.g. `"Polygon"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Raw coordinate array.
    pub coordinates: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

impl Config {
    /// Parse the configured service area and return its polygon geometry.
    ///
    /// The config carries a full GeoJSON FeatureCollection string; the poll
    /// protocol wants the first feature's `Polygon` geometry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when the string is not valid
    /// GeoJSON, has no features, or the first feature is not a polygon.
    pub fn service_area_polygon(&self) -> Result<Geometry, ConfigError> {
        let collection: FeatureCollection = serde_json::from_str(&self.agent.service_area)
            .map_err(|e| ConfigError::InvalidField {
                field: "agent.service_area".into(),
                value: self.agent.service_area.clone(),
                reason: format!("not a GeoJSON FeatureCollection: {e}"),
            })?;

        let feature = collection
            .features
            .into_iter()
            .next()
            .ok_or_else(|| ConfigError::InvalidField {
                field: "agent.service_area".into(),
                value: self.agent.service_area.clone(),
                reason: "service area is empty or invalid".into(),
            })?;

        if feature.geometry.kind != "Polygon" {
            return Err(ConfigError::InvalidField {
                field: "agent.service_area".into(),
                value: feature.geometry.kind,
                reason: "service area is not a valid polygon".into(),
            });
        }

        Ok(feature.geometry)
    }
}
