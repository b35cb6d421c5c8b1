//! Layered node configuration: defaults, then YAML, then `MESHKIT__*` env.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use meshkit_registry::RegistryConfig;
use meshkit_runtime::{LoggingConfig, ServerOptions};
use serde::{Deserialize, Serialize};

/// Prefix of environment overrides; `__` separates nested keys, so
/// `MESHKIT__HTTP__ADDRESS=:8081` sets `http.address`.
pub const ENV_PREFIX: &str = "MESHKIT__";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub registry: RegistryConfig,
    pub rpc: ServerOptions,
    pub http: ServerOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            registry: RegistryConfig::default(),
            rpc: ServerOptions::rpc_defaults()
                .with_name("meshkit.node.rpc")
                .with_address(":9090"),
            http: ServerOptions::http_defaults()
                .with_name("meshkit.node.web")
                .with_address(":8080"),
        }
    }
}

impl AppConfig {
    /// Merge the layers into one config.
    ///
    /// # Errors
    /// Fails when the file does not exist, or when any layer holds an unknown
    /// key or a value of the wrong type.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }
}
