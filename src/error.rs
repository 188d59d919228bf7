use thiserror::Error;
use crate::events::connection::FailureClass;

#[derive(Error, Debug)]
pub enum Error {
    // Transport Errors
    #[error("WebSocket transport error: {0}")]
    Transport(String),

    #[error("Proxy CONNECT failed: {0}")]
    ProxyConnect(String),

    #[error("Proxy authentication rejected by {0}")]
    ProxyAuthRejected(String),

    #[error("Upstream blocked the connection (HTTP {status})")]
    UpstreamBlocked { status: u16 },

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    // Feed Errors
    #[error("Ticker frame parse error: {0}")]
    ParseError(String),

    #[error("Invalid price")]
    InvalidPrice,

    #[error("Stream not connected")]
    NotConnected,

    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Proxy pool is empty")]
    EmptyProxyPool,

    #[error("No symbols configured")]
    NoSymbols,

    // IO Errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Recovery classification for the supervisor. Anything not tied to a
    /// proxy or an upstream block is generic and handled by plain reconnect.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Error::ProxyAuthRejected(_) => FailureClass::ProxyAuth,
            Error::UpstreamBlocked { status } => FailureClass::from_status(*status),
            _ => FailureClass::Generic,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
