use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, client_async};
use tracing::Instrument;
use url::Url;

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::events::connection::{ConnectionEvent, FailureClass};
use crate::events::price::{PriceSource, TickerUpdate};
use crate::feed::proxy::ProxyEndpoint;
use crate::feed::repository::PriceRepository;
use crate::observability::metrics;
use crate::observability::tracing::trace_stream_connection;
use crate::types::ids::ConnectionId;
use crate::utils::helper::truncate_for_log;

pub type EventSender = mpsc::UnboundedSender<(ConnectionId, ConnectionEvent)>;

/// Lifecycle of one physical stream attempt. Closed is terminal; every
/// attempt gets a fresh connection instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Factory seam between the supervisor and the transport, so supervisor
/// behavior can be driven by a scripted connector in tests
pub trait StreamConnector: Send + Sync {
    fn spawn(
        &self,
        proxy: ProxyEndpoint,
        symbols: &[String],
        events: EventSender,
    ) -> Box<dyn ManagedConnection>;
}

#[async_trait::async_trait]
pub trait ManagedConnection: Send {
    fn id(&self) -> ConnectionId;
    async fn disconnect(&mut self);
}

/// Spawns real `StreamConnection`s against the exchange endpoint
pub struct TickerStreamConnector {
    config: FeedConfig,
    repository: Arc<PriceRepository>,
}

impl TickerStreamConnector {
    pub fn new(config: FeedConfig, repository: Arc<PriceRepository>) -> Self {
        TickerStreamConnector { config, repository }
    }
}

impl StreamConnector for TickerStreamConnector {
    fn spawn(
        &self,
        proxy: ProxyEndpoint,
        symbols: &[String],
        events: EventSender,
    ) -> Box<dyn ManagedConnection> {
        Box::new(StreamConnection::spawn(
            self.config.clone(),
            proxy,
            symbols.to_vec(),
            self.repository.clone(),
            events,
        ))
    }
}

/// One WebSocket to the exchange's combined ticker endpoint, tunneled
/// through an HTTP CONNECT proxy. Parses inbound frames into the repository
/// and reports lifecycle to the supervisor; recovery is not its business.
pub struct StreamConnection {
    id: ConnectionId,
    state: Arc<RwLock<StreamState>>,
    ticker_tx: broadcast::Sender<TickerUpdate>,
    handle: Option<JoinHandle<()>>,
}

impl StreamConnection {
    /// Spawn the connect-and-read task. Completion (open, classified failure
    /// or close) is reported through `events`, tagged with this connection's
    /// id.
    pub fn spawn(
        config: FeedConfig,
        proxy: ProxyEndpoint,
        symbols: Vec<String>,
        repository: Arc<PriceRepository>,
        events: EventSender,
    ) -> Self {
        let id = ConnectionId::new();
        let state = Arc::new(RwLock::new(StreamState::Idle));
        let (ticker_tx, _) = broadcast::channel(256);

        let span = trace_stream_connection(&id, &proxy);
        let task_state = state.clone();
        let task_ticker = ticker_tx.clone();
        let handle = tokio::spawn(
            run(id, config, proxy, symbols, repository, events, task_state, task_ticker)
                .instrument(span),
        );

        StreamConnection {
            id,
            state,
            ticker_tx,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.read().unwrap()
    }

    /// Parsed ticker payloads from this connection only, for
    /// symbol-specific listeners
    pub fn ticker_updates(&self) -> broadcast::Receiver<TickerUpdate> {
        self.ticker_tx.subscribe()
    }
}

#[async_trait::async_trait]
impl ManagedConnection for StreamConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    /// Local close. Safe to call when the stream is already down.
    async fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
        *self.state.write().unwrap() = StreamState::Closed;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    id: ConnectionId,
    config: FeedConfig,
    proxy: ProxyEndpoint,
    symbols: Vec<String>,
    repository: Arc<PriceRepository>,
    events: EventSender,
    state: Arc<RwLock<StreamState>>,
    ticker_tx: broadcast::Sender<TickerUpdate>,
) {
    *state.write().unwrap() = StreamState::Connecting;

    let stream = match connect(&config, &proxy, &symbols).await {
        Ok(stream) => stream,
        Err(e) => {
            let class = e.failure_class();
            tracing::warn!("Stream connect via {} failed ({:?}): {}", proxy, class, e);
            *state.write().unwrap() = StreamState::Closed;
            let _ = events.send((id, ConnectionEvent::Failed(class)));
            return;
        }
    };

    *state.write().unwrap() = StreamState::Open;
    metrics::FEED_CONNECTED.set(1);
    tracing::info!("Ticker stream open for {} symbols", symbols.len());
    let _ = events.send((id, ConnectionEvent::Opened));

    let terminal = read_loop(&config, stream, &repository, &ticker_tx).await;

    metrics::FEED_CONNECTED.set(0);
    *state.write().unwrap() = StreamState::Closed;
    let _ = events.send((id, terminal));
}

async fn connect(
    config: &FeedConfig,
    proxy: &ProxyEndpoint,
    symbols: &[String],
) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    let url = stream_url(&config.stream_url, symbols)?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::ConfigError(format!("stream URL has no host: {}", url)))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(443);

    let tcp = open_proxy_tunnel(proxy, &host, port, config.connect_timeout()).await?;

    let connector = native_tls::TlsConnector::new().map_err(|e| Error::Tls(e.to_string()))?;
    let connector = tokio_native_tls::TlsConnector::from(connector);
    let tls_stream = timeout(config.connect_timeout(), connector.connect(&host, tcp))
        .await
        .map_err(|_| Error::ConnectTimeout(config.connect_timeout()))?
        .map_err(|e| Error::Tls(e.to_string()))?;

    // upstream rejects non-browser clients, so dress the handshake up
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::Transport(e.to_string()))?;
    let headers = request.headers_mut();
    headers.insert(
        "User-Agent",
        HeaderValue::from_str(&config.user_agent)
            .map_err(|_| Error::ConfigError("invalid user agent header".to_string()))?,
    );
    headers.insert(
        "Origin",
        HeaderValue::from_str(&config.origin)
            .map_err(|_| Error::ConfigError("invalid origin header".to_string()))?,
    );

    let (ws_stream, _) = timeout(
        config.connect_timeout(),
        client_async(request, MaybeTlsStream::NativeTls(tls_stream)),
    )
    .await
    .map_err(|_| Error::ConnectTimeout(config.connect_timeout()))?
    .map_err(classify_handshake_error)?;

    Ok(ws_stream)
}

/// Combined-stream URL: lowercase `<symbol>@ticker` names, slash-joined in
/// the `streams` query parameter
fn stream_url(base: &str, symbols: &[String]) -> Result<Url> {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@ticker", s.to_lowercase()))
        .collect();
    let raw = format!("{}?streams={}", base, streams.join("/"));
    Url::parse(&raw).map_err(|e| Error::ConfigError(format!("invalid stream URL {}: {}", raw, e)))
}

/// Open a TCP tunnel to `target_host:target_port` through the proxy using
/// HTTP CONNECT with basic auth
async fn open_proxy_tunnel(
    proxy: &ProxyEndpoint,
    target_host: &str,
    target_port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream> {
    let tcp = timeout(connect_timeout, TcpStream::connect(proxy.authority()))
        .await
        .map_err(|_| Error::ConnectTimeout(connect_timeout))?
        .map_err(|e| Error::ProxyConnect(format!("{}: {}", proxy, e)))?;

    let request = build_connect_request(proxy, target_host, target_port);

    let (reader, mut writer) = tcp.into_split();
    writer
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::ProxyConnect(e.to_string()))?;

    let mut reader = BufReader::new(reader);
    let mut status_line = String::new();
    reader
        .read_line(&mut status_line)
        .await
        .map_err(|e| Error::ProxyConnect(e.to_string()))?;

    let status = parse_connect_status(&status_line)
        .ok_or_else(|| Error::ProxyConnect(format!("bad CONNECT response: {}", status_line.trim())))?;
    match status {
        200..=299 => {}
        407 => return Err(Error::ProxyAuthRejected(proxy.to_string())),
        402 | 451 => return Err(Error::UpstreamBlocked { status }),
        _ => {
            return Err(Error::ProxyConnect(format!(
                "CONNECT returned {}",
                status_line.trim()
            )));
        }
    }

    // drain remaining response headers up to the blank line
    loop {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| Error::ProxyConnect(e.to_string()))?;
        if n == 0 || line.trim().is_empty() {
            break;
        }
    }

    reader
        .into_inner()
        .reunite(writer)
        .map_err(|e| Error::ProxyConnect(e.to_string()))
}

fn build_connect_request(proxy: &ProxyEndpoint, target_host: &str, target_port: u16) -> String {
    let mut request = format!(
        "CONNECT {target}:{port} HTTP/1.1\r\nHost: {target}:{port}\r\nConnection: keep-alive\r\n",
        target = target_host,
        port = target_port,
    );
    if proxy.has_credentials() {
        let token = BASE64.encode(format!("{}:{}", proxy.username, proxy.password));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", token));
    }
    request.push_str("\r\n");
    request
}

fn parse_connect_status(status_line: &str) -> Option<u16> {
    status_line.split_whitespace().nth(1)?.parse().ok()
}

/// Map a handshake error onto the crate taxonomy, preferring the HTTP
/// status and falling back to message substrings
fn classify_handshake_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            match FailureClass::from_status(status) {
                FailureClass::ProxyAuth => Error::ProxyAuthRejected(format!("HTTP {}", status)),
                FailureClass::GeoRestricted | FailureClass::PaymentRequired => {
                    Error::UpstreamBlocked { status }
                }
                FailureClass::Generic => {
                    Error::Transport(format!("handshake rejected with HTTP {}", status))
                }
            }
        }
        other => {
            let text = other.to_string();
            if text.contains("407") {
                Error::ProxyAuthRejected(text)
            } else if text.contains("451") {
                Error::UpstreamBlocked { status: 451 }
            } else if text.contains("402") {
                Error::UpstreamBlocked { status: 402 }
            } else {
                Error::Transport(text)
            }
        }
    }
}

async fn read_loop(
    config: &FeedConfig,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    repository: &PriceRepository,
    ticker_tx: &broadcast::Sender<TickerUpdate>,
) -> ConnectionEvent {
    let (mut write, mut read) = stream.split();

    loop {
        let msg = match timeout(config.read_timeout(), read.next()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                return ConnectionEvent::Closed {
                    code: None,
                    reason: "stream ended".to_string(),
                };
            }
            Err(_) => {
                tracing::warn!("No frames for {:?}, closing stream", config.read_timeout());
                let _ = write.close().await;
                return ConnectionEvent::Failed(FailureClass::Generic);
            }
        };

        match msg {
            Ok(Message::Text(text)) => match parse_ticker_frame(&text) {
                Some(update) => {
                    repository.update(&update.symbol, update.price, PriceSource::LiveFeed);
                    let _ = ticker_tx.send(update);
                }
                None => {
                    metrics::FRAMES_DROPPED.inc();
                    tracing::debug!("Unrecognized frame: {}", truncate_for_log(&text, 256));
                }
            },
            Ok(Message::Ping(payload)) => {
                if write.send(Message::Pong(payload)).await.is_err() {
                    return ConnectionEvent::Closed {
                        code: None,
                        reason: "pong write failed".to_string(),
                    };
                }
            }
            Ok(Message::Pong(_)) => {}
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                    .unwrap_or((None, String::new()));
                return ConnectionEvent::Closed { code, reason };
            }
            Ok(Message::Binary(_)) | Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!("Stream read error: {}", e);
                return ConnectionEvent::Failed(classify_handshake_error(e).failure_class());
            }
        }
    }
}

#[derive(Deserialize)]
struct StreamEnvelope {
    #[allow(dead_code)]
    stream: String,
    data: RawTickerFrame,
}

// 24h ticker payload; only the fields this layer consumes
#[derive(Deserialize)]
struct RawTickerFrame {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "P")]
    percent_change: String,
    #[serde(rename = "E", default)]
    event_time: u64,
}

/// Extract a ticker payload from a combined-stream envelope or a bare
/// frame. Anything else is None; unrecognized shapes are dropped, never
/// fatal.
fn parse_ticker_frame(text: &str) -> Option<TickerUpdate> {
    let frame = match serde_json::from_str::<StreamEnvelope>(text) {
        Ok(envelope) => envelope.data,
        Err(_) => serde_json::from_str::<RawTickerFrame>(text).ok()?,
    };

    let price = frame.last_price.parse::<f64>().ok()?;
    let percent_change_24h = frame.percent_change.parse::<f64>().unwrap_or(0.0);

    Some(TickerUpdate {
        symbol: frame.symbol,
        price,
        percent_change_24h,
        event_time: frame.event_time,
    })
}
