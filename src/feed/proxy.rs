use serde::{Deserialize, Serialize};
use std::fmt;
use crate::config::ProxyConfig;
use crate::error::{Error, Result};

/// One HTTP CONNECT proxy. Immutable once loaded; where the values came from
/// (env, file, defaults) is the configuration layer's business.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl ProxyEndpoint {
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

// Credentials stay out of logs
impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Ordered proxy candidates plus a cyclic cursor. Pure selection, no state
/// machine.
pub struct ProxyPool {
    endpoints: Vec<ProxyEndpoint>,
    cursor: usize,
    override_endpoint: Option<ProxyEndpoint>,
}

impl ProxyPool {
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Result<Self> {
        Self::with_override(endpoints, None)
    }

    pub fn with_override(
        endpoints: Vec<ProxyEndpoint>,
        override_endpoint: Option<ProxyEndpoint>,
    ) -> Result<Self> {
        if endpoints.is_empty() && override_endpoint.is_none() {
            return Err(Error::EmptyProxyPool);
        }
        Ok(ProxyPool {
            endpoints,
            cursor: 0,
            override_endpoint,
        })
    }

    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        Self::with_override(config.endpoints.clone(), config.override_endpoint())
    }

    /// The endpoint the next attempt should use. A configured override wins
    /// over the pool list.
    pub fn current(&self) -> ProxyEndpoint {
        if let Some(endpoint) = &self.override_endpoint {
            return endpoint.clone();
        }
        self.endpoints[self.cursor].clone()
    }

    /// Move the cursor to the next endpoint, wrapping past the end, and
    /// return the new selection. The cursor moves even when an override is
    /// configured.
    pub fn advance(&mut self) -> ProxyEndpoint {
        if !self.endpoints.is_empty() {
            self.cursor = (self.cursor + 1) % self.endpoints.len();
        }
        self.current()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(host: &str) -> ProxyEndpoint {
        ProxyEndpoint {
            host: host.to_string(),
            port: 8080,
            username: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    #[test]
    fn empty_pool_is_a_configuration_error() {
        assert!(matches!(ProxyPool::new(vec![]), Err(Error::EmptyProxyPool)));
    }

    #[test]
    fn advance_is_cyclic() {
        let endpoints = vec![endpoint("a"), endpoint("b"), endpoint("c")];
        let mut pool = ProxyPool::new(endpoints.clone()).unwrap();

        let original = pool.current();
        for _ in 0..endpoints.len() {
            pool.advance();
        }
        assert_eq!(pool.current(), original);
        assert_eq!(pool.cursor(), 0);
    }

    #[test]
    fn advance_walks_in_order() {
        let mut pool = ProxyPool::new(vec![endpoint("a"), endpoint("b"), endpoint("c")]).unwrap();
        assert_eq!(pool.current().host, "a");
        assert_eq!(pool.advance().host, "b");
        assert_eq!(pool.advance().host, "c");
        assert_eq!(pool.advance().host, "a");
    }

    #[test]
    fn override_wins_but_cursor_still_rotates() {
        let mut pool = ProxyPool::with_override(
            vec![endpoint("a"), endpoint("b")],
            Some(endpoint("forced")),
        )
        .unwrap();

        assert_eq!(pool.current().host, "forced");
        assert_eq!(pool.advance().host, "forced");
        assert_eq!(pool.cursor(), 1);
    }

    #[test]
    fn override_alone_is_a_valid_pool() {
        let mut pool = ProxyPool::with_override(vec![], Some(endpoint("forced"))).unwrap();
        assert_eq!(pool.current().host, "forced");
        assert_eq!(pool.advance().host, "forced");
        assert_eq!(pool.cursor(), 0);
    }

    #[test]
    fn display_never_exposes_credentials() {
        let rendered = format!("{}", endpoint("proxy.example.com"));
        assert_eq!(rendered, "proxy.example.com:8080");
        assert!(!rendered.contains("pass"));
    }
}
