use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::feed::proxy::ProxyEndpoint;

pub mod loader;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedConfig {
    pub enabled: bool,
    pub symbols: Vec<String>,
    pub stream_url: String,
    pub user_agent: String,
    pub origin: String,
    pub reconnect_delay_ms: u64,
    pub proxy_retry_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl FeedConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn proxy_retry_delay(&self) -> Duration {
        Duration::from_millis(self.proxy_retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            enabled: true,
            symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "BNBUSDT".to_string(),
                "SOLUSDT".to_string(),
                "XRPUSDT".to_string(),
                "ADAUSDT".to_string(),
                "DOGEUSDT".to_string(),
            ],
            stream_url: "wss://stream.binance.com:9443/stream".to_string(),
            // Upstream rejects clients that do not look like a browser
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .to_string(),
            origin: "https://www.binance.com".to_string(),
            reconnect_delay_ms: 5000,
            proxy_retry_delay_ms: 500,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub tick_interval_ms: u64,
    /// Per-tick perturbation bound, in percent, applied on each side
    pub max_step_pct: f64,
}

impl SimulationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            tick_interval_ms: 5000,
            max_step_pct: 0.5,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub endpoints: Vec<ProxyEndpoint>,
    pub override_host: Option<String>,
    pub override_port: Option<u16>,
    pub override_username: Option<String>,
    pub override_password: Option<String>,
}

impl ProxyConfig {
    /// Environment-supplied override endpoint; present only when both host
    /// and port are configured
    pub fn override_endpoint(&self) -> Option<ProxyEndpoint> {
        match (&self.override_host, self.override_port) {
            (Some(host), Some(port)) => Some(ProxyEndpoint {
                host: host.clone(),
                port,
                username: self.override_username.clone().unwrap_or_default(),
                password: self.override_password.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }
}
