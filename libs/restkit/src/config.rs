//! Typed API configuration.
//!
//! Loading is layered, lowest priority first:
//! 1. `ApiConfig::default()`
//! 2. an optional YAML file
//! 3. environment variables prefixed with `RESTKIT__` (`RESTKIT__QUERY__MAX_TOP=50`)

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Environment variable prefix understood by [`ApiConfig::load`].
pub const ENV_PREFIX: &str = "RESTKIT__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ApiConfig {
    /// Namespace of the exposed model.
    pub namespace: String,
    pub query: QueryConfig,
    pub submit: SubmitConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            namespace: "Default".to_owned(),
            query: QueryConfig::default(),
            submit: SubmitConfig::default(),
        }
    }
}

/// Caps applied to incoming query expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QueryConfig {
    /// Maximum value accepted by `Take` (default: 1000).
    pub max_top: u64,
    /// Maximum number of keys in one `OrderBy` (default: 5).
    pub max_order_by_keys: usize,
    /// Maximum recursion depth of the expression pipeline (default: 256).
    pub max_pipeline_depth: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_top: 1000,
            max_order_by_keys: 5,
            max_pipeline_depth: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SubmitConfig {
    /// Maximum number of items in one change-set (default: 1000).
    pub max_change_set_size: usize,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            max_change_set_size: 1000,
        }
    }
}

impl ApiConfig {
    /// Load configuration from defaults, an optional YAML file and the environment.
    ///
    /// # Errors
    /// Returns `ConfigurationError::InvalidConfig` if the file is missing or any layer
    /// fails to deserialize.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut figment = Figment::from(Serialized::defaults(ApiConfig::default()));
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigurationError::InvalidConfig(format!(
                    "config file does not exist: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigurationError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let cfg = ApiConfig::default();
        assert_eq!(cfg.namespace, "Default");
        assert_eq!(cfg.query.max_top, 1000);
        assert_eq!(cfg.query.max_order_by_keys, 5);
        assert_eq!(cfg.submit.max_change_set_size, 1000);
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "namespace: Northwind\nquery:\n  max_top: 50").unwrap();

        let cfg = temp_env::with_vars_unset(["RESTKIT__QUERY__MAX_TOP"], || {
            ApiConfig::load(Some(file.path())).unwrap()
        });
        assert_eq!(cfg.namespace, "Northwind");
        assert_eq!(cfg.query.max_top, 50);
        assert_eq!(cfg.query.max_order_by_keys, 5, "untouched keys keep defaults");
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "query:\n  max_top: 50").unwrap();

        let cfg = temp_env::with_var("RESTKIT__QUERY__MAX_TOP", Some("7"), || {
            ApiConfig::load(Some(file.path())).unwrap()
        });
        assert_eq!(cfg.query.max_top, 7);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "query:\n  max_topp: 50").unwrap();

        let err = ApiConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidConfig(_)));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = ApiConfig::load(Some(Path::new("/nonexistent/restkit.yaml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
