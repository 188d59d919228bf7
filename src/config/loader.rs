use crate::config::{FeedConfig, ProxyConfig, SimulationConfig};
use crate::error::{Error, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub simulation: SimulationConfig,
    pub proxy: ProxyConfig,
}

impl AppConfig {
    /// Layered load: built-in defaults, then config files, then FEEDINFRA_*
    /// environment overrides (FEEDINFRA_FEED__ENABLED and friends).
    pub fn load(env: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("FEEDINFRA").separator("__"))
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))
    }
}
