use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{FeedConfig, ProxyConfig};
use crate::error::{Error, Result};
use crate::events::connection::{ConnectionEvent, FailureClass};
use crate::feed::connection::{EventSender, ManagedConnection, StreamConnector, TickerStreamConnector};
use crate::feed::proxy::ProxyPool;
use crate::feed::repository::PriceRepository;
use crate::feed::simulation::SimulationEngine;
use crate::observability::metrics;

/// Supervisor-level connection state. Exactly one variant is active at a
/// time, so "connected with no live socket" is unrepresentable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { proxy_index: usize },
    Connected,
    Reconnecting { proxy_index: usize, delay: Duration },
    Simulating,
}

enum Command {
    Stop,
}

struct ControlHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Drives the stream lifecycle against the proxy pool and falls back to
/// the simulation engine when the live feed cannot be kept alive. Failure
/// classification decides between proxy rotation and a plain fixed-delay
/// reconnect; nothing escapes `start()` except configuration errors.
pub struct ConnectionSupervisor {
    config: FeedConfig,
    proxy_config: ProxyConfig,
    repository: Arc<PriceRepository>,
    simulation: Arc<SimulationEngine>,
    connector: Arc<dyn StreamConnector>,
    state: Arc<RwLock<ConnectionState>>,
    control: Mutex<Option<ControlHandle>>,
}

impl ConnectionSupervisor {
    pub fn new(
        config: FeedConfig,
        proxy_config: ProxyConfig,
        repository: Arc<PriceRepository>,
        simulation: Arc<SimulationEngine>,
        connector: Arc<dyn StreamConnector>,
    ) -> Self {
        ConnectionSupervisor {
            config,
            proxy_config,
            repository,
            simulation,
            connector,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            control: Mutex::new(None),
        }
    }

    /// Wire up against the real exchange transport
    pub fn with_live_connector(
        config: FeedConfig,
        proxy_config: ProxyConfig,
        repository: Arc<PriceRepository>,
        simulation: Arc<SimulationEngine>,
    ) -> Self {
        let connector = Arc::new(TickerStreamConnector::new(config.clone(), repository.clone()));
        Self::new(config, proxy_config, repository, simulation, connector)
    }

    /// Begin supervising. Only configuration problems surface here; every
    /// transport failure afterwards is retried or absorbed by the
    /// simulation fallback.
    pub fn start(&self) -> Result<()> {
        let mut control = self.control.lock().unwrap();
        if control.as_ref().map(|c| !c.task.is_finished()).unwrap_or(false) {
            warn!("Supervisor already running");
            return Ok(());
        }

        if self.config.symbols.is_empty() {
            return Err(Error::NoSymbols);
        }
        let pool = ProxyPool::from_config(&self.proxy_config)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(control_loop(
            self.config.clone(),
            pool,
            self.repository.clone(),
            self.simulation.clone(),
            self.connector.clone(),
            self.state.clone(),
            command_rx,
        ));
        *control = Some(ControlHandle {
            commands: command_tx,
            task,
        });
        Ok(())
    }

    /// Cancel any pending reconnect and tear down the active connection
    /// and the simulation fallback. Safe to call twice or before
    /// `start()`; a fresh `start()` resumes.
    pub async fn stop(&self) {
        let control = self.control.lock().unwrap().take();
        let Some(control) = control else {
            return;
        };

        if control.commands.send(Command::Stop).is_err() {
            // control loop already gone
            control.task.abort();
        }
        let _ = control.task.await;
        *self.state.write().unwrap() = ConnectionState::Disconnected;
    }

    pub fn state(&self) -> ConnectionState {
        self.state.read().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.control
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| !c.task.is_finished())
            .unwrap_or(false)
    }
}

async fn control_loop(
    config: FeedConfig,
    mut pool: ProxyPool,
    repository: Arc<PriceRepository>,
    simulation: Arc<SimulationEngine>,
    connector: Arc<dyn StreamConnector>,
    state: Arc<RwLock<ConnectionState>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let (event_tx, mut events): (EventSender, _) = mpsc::unbounded_channel();
    let mut cascade = RotationCascade::new();
    let mut reconnect_at: Option<Instant> = None;

    set_state(&state, ConnectionState::Connecting { proxy_index: pool.cursor() });
    let mut active: Option<Box<dyn ManagedConnection>> =
        Some(open_connection(&config, &pool, &connector, &event_tx));

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Stop) | None => break,
                }
            }
            _ = wait_until(reconnect_at), if reconnect_at.is_some() => {
                reconnect_at = None;
                set_state(&state, ConnectionState::Connecting { proxy_index: pool.cursor() });
                active = Some(open_connection(&config, &pool, &connector, &event_tx));
            }
            event = events.recv() => {
                // senders never all drop while this loop holds event_tx
                let Some((connection_id, event)) = event else { break };
                if active.as_ref().map(|c| c.id()) != Some(connection_id) {
                    tracing::debug!("Ignoring event from torn-down connection {}", connection_id);
                    continue;
                }

                match event {
                    ConnectionEvent::Opened => {
                        cascade.reset();
                        simulation.stop();
                        set_state(&state, ConnectionState::Connected);
                        info!("Live feed connected via proxy {}", pool.current());
                    }
                    ConnectionEvent::Failed(FailureClass::ProxyAuth) => {
                        teardown(&mut active).await;
                        metrics::PROXY_ROTATIONS.inc();
                        match cascade.rotate(&mut pool) {
                            CascadeOutcome::Rotated(next_index) => {
                                warn!("Proxy auth rejected, rotating to endpoint {}", next_index);
                                reconnect_at = schedule(config.proxy_retry_delay());
                                set_state(&state, ConnectionState::Reconnecting {
                                    proxy_index: next_index,
                                    delay: config.proxy_retry_delay(),
                                });
                            }
                            CascadeOutcome::Exhausted => {
                                tracing::error!(
                                    "All {} proxies rejected authentication, simulating while retrying",
                                    pool.len().max(1),
                                );
                                simulation.start(repository.get_all());
                                reconnect_at = schedule(config.reconnect_delay());
                                set_state(&state, ConnectionState::Simulating);
                            }
                        }
                    }
                    ConnectionEvent::Failed(class) if class.is_upstream_block() => {
                        teardown(&mut active).await;
                        warn!("Upstream blocked the feed ({:?}), simulating while retrying", class);
                        simulation.start(repository.get_all());
                        reconnect_at = schedule(config.reconnect_delay());
                        set_state(&state, ConnectionState::Simulating);
                    }
                    ConnectionEvent::Failed(_) => {
                        teardown(&mut active).await;
                        warn!("Stream failed, reconnecting in {:?}", config.reconnect_delay());
                        if !simulation.is_running() {
                            simulation.start(repository.get_all());
                        }
                        reconnect_at = schedule(config.reconnect_delay());
                        set_state(&state, ConnectionState::Reconnecting {
                            proxy_index: pool.cursor(),
                            delay: config.reconnect_delay(),
                        });
                    }
                    ConnectionEvent::Closed { code, reason } => {
                        teardown(&mut active).await;
                        warn!("Stream closed (code {:?}): {}", code, reason);
                        if !simulation.is_running() {
                            simulation.start(repository.get_all());
                        }
                        reconnect_at = schedule(config.reconnect_delay());
                        set_state(&state, ConnectionState::Reconnecting {
                            proxy_index: pool.cursor(),
                            delay: config.reconnect_delay(),
                        });
                    }
                }
            }
        }
    }

    teardown(&mut active).await;
    simulation.stop();
    info!("Supervisor stopped");
}

fn open_connection(
    config: &FeedConfig,
    pool: &ProxyPool,
    connector: &Arc<dyn StreamConnector>,
    events: &EventSender,
) -> Box<dyn ManagedConnection> {
    metrics::CONNECT_ATTEMPTS.inc();
    connector.spawn(pool.current(), &config.symbols, events.clone())
}

async fn teardown(active: &mut Option<Box<dyn ManagedConnection>>) {
    if let Some(mut connection) = active.take() {
        connection.disconnect().await;
    }
}

fn schedule(delay: Duration) -> Option<Instant> {
    metrics::RECONNECTS_SCHEDULED.inc();
    Some(Instant::now() + delay)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn set_state(state: &Arc<RwLock<ConnectionState>>, next: ConnectionState) {
    let mut guard = state.write().unwrap();
    tracing::debug!("Connection state {:?} -> {:?}", *guard, next);
    *guard = next;
}

/// Tracks a run of consecutive proxy-auth failures. Wrapping back onto the
/// endpoint where the run started means every proxy was tried and rejected.
struct RotationCascade {
    origin: Option<usize>,
}

enum CascadeOutcome {
    Rotated(usize),
    Exhausted,
}

impl RotationCascade {
    fn new() -> Self {
        RotationCascade { origin: None }
    }

    fn rotate(&mut self, pool: &mut ProxyPool) -> CascadeOutcome {
        let origin = *self.origin.get_or_insert(pool.cursor());
        pool.advance();
        if pool.cursor() == origin {
            self.origin = None;
            CascadeOutcome::Exhausted
        } else {
            CascadeOutcome::Rotated(pool.cursor())
        }
    }

    fn reset(&mut self) {
        self.origin = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::events::price::PriceSource;
    use crate::feed::proxy::ProxyEndpoint;
    use crate::types::ids::ConnectionId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{Duration, sleep};

    #[derive(Clone, Copy)]
    enum Script {
        FailAuth,
        FailGeo,
        OpenThenClose,
        Open,
    }

    struct FakeConnection {
        id: ConnectionId,
    }

    #[async_trait::async_trait]
    impl ManagedConnection for FakeConnection {
        fn id(&self) -> ConnectionId {
            self.id
        }

        async fn disconnect(&mut self) {}
    }

    /// Scripted transport: attempt N plays script entry N, then keeps
    /// answering Open
    struct FakeConnector {
        scripts: Mutex<Vec<Script>>,
        seen_proxies: Mutex<Vec<String>>,
        attempts: AtomicUsize,
    }

    impl FakeConnector {
        fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(FakeConnector {
                scripts: Mutex::new(scripts),
                seen_proxies: Mutex::new(Vec::new()),
                attempts: AtomicUsize::new(0),
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        fn seen_proxies(&self) -> Vec<String> {
            self.seen_proxies.lock().unwrap().clone()
        }
    }

    impl StreamConnector for FakeConnector {
        fn spawn(
            &self,
            proxy: ProxyEndpoint,
            _symbols: &[String],
            events: EventSender,
        ) -> Box<dyn ManagedConnection> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.seen_proxies.lock().unwrap().push(proxy.host.clone());

            let script = {
                let mut scripts = self.scripts.lock().unwrap();
                if scripts.is_empty() { Script::Open } else { scripts.remove(0) }
            };

            let id = ConnectionId::new();
            match script {
                Script::FailAuth => {
                    let _ = events.send((id, ConnectionEvent::Failed(FailureClass::ProxyAuth)));
                }
                Script::FailGeo => {
                    let _ = events.send((id, ConnectionEvent::Failed(FailureClass::GeoRestricted)));
                }
                Script::OpenThenClose => {
                    let _ = events.send((id, ConnectionEvent::Opened));
                    let _ = events.send((
                        id,
                        ConnectionEvent::Closed { code: Some(1006), reason: "abnormal".to_string() },
                    ));
                }
                Script::Open => {
                    let _ = events.send((id, ConnectionEvent::Opened));
                }
            }
            Box::new(FakeConnection { id })
        }
    }

    fn test_config() -> FeedConfig {
        FeedConfig {
            symbols: vec!["BTCUSDT".to_string()],
            reconnect_delay_ms: 100,
            proxy_retry_delay_ms: 10,
            ..FeedConfig::default()
        }
    }

    fn proxies(n: usize) -> ProxyConfig {
        ProxyConfig {
            endpoints: (0..n)
                .map(|i| ProxyEndpoint {
                    host: format!("proxy{}", i),
                    port: 8080,
                    username: String::new(),
                    password: String::new(),
                })
                .collect(),
            ..ProxyConfig::default()
        }
    }

    fn build(
        scripts: Vec<Script>,
        proxy_count: usize,
    ) -> (ConnectionSupervisor, Arc<FakeConnector>, Arc<PriceRepository>, Arc<SimulationEngine>) {
        let repository = Arc::new(PriceRepository::new());
        let simulation = Arc::new(SimulationEngine::new(
            repository.clone(),
            SimulationConfig { tick_interval_ms: 10, max_step_pct: 0.5 },
        ));
        let connector = FakeConnector::new(scripts);
        let supervisor = ConnectionSupervisor::new(
            test_config(),
            proxies(proxy_count),
            repository.clone(),
            simulation.clone(),
            connector.clone(),
        );
        (supervisor, connector, repository, simulation)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn cascade_detects_exhaustion_on_wrap() {
        let mut pool = ProxyPool::from_config(&proxies(3)).unwrap();
        let mut cascade = RotationCascade::new();

        assert!(matches!(cascade.rotate(&mut pool), CascadeOutcome::Rotated(1)));
        assert!(matches!(cascade.rotate(&mut pool), CascadeOutcome::Rotated(2)));
        assert!(matches!(cascade.rotate(&mut pool), CascadeOutcome::Exhausted));
    }

    #[test]
    fn cascade_with_single_proxy_exhausts_immediately() {
        let mut pool = ProxyPool::from_config(&proxies(1)).unwrap();
        let mut cascade = RotationCascade::new();
        assert!(matches!(cascade.rotate(&mut pool), CascadeOutcome::Exhausted));
    }

    #[test]
    fn cascade_reset_starts_a_fresh_run() {
        let mut pool = ProxyPool::from_config(&proxies(3)).unwrap();
        let mut cascade = RotationCascade::new();

        assert!(matches!(cascade.rotate(&mut pool), CascadeOutcome::Rotated(1)));
        cascade.reset();
        assert!(matches!(cascade.rotate(&mut pool), CascadeOutcome::Rotated(2)));
        assert!(matches!(cascade.rotate(&mut pool), CascadeOutcome::Rotated(0)));
        assert!(matches!(cascade.rotate(&mut pool), CascadeOutcome::Exhausted));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_failures_rotate_through_pool_then_simulate() {
        let (supervisor, connector, _repo, simulation) = build(
            vec![Script::FailAuth, Script::FailAuth, Script::FailAuth],
            3,
        );

        supervisor.start().unwrap();

        // exhaustion after the third rejection starts the fallback
        wait_for(|| simulation.is_running()).await;
        assert_eq!(
            connector.seen_proxies()[..3],
            ["proxy0".to_string(), "proxy1".to_string(), "proxy2".to_string()],
        );

        // background retry (script exhausted, so it opens) recovers the feed
        wait_for(|| supervisor.state() == ConnectionState::Connected).await;
        wait_for(|| !simulation.is_running()).await;
        assert!(connector.attempts() >= 4);

        supervisor.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn closed_feed_simulates_and_reconnects() {
        let (supervisor, connector, _repo, simulation) = build(vec![Script::OpenThenClose], 1);

        supervisor.start().unwrap();

        // the close starts the fallback and schedules a retry
        wait_for(|| simulation.is_running()).await;

        // the retry opens and the fallback stops
        wait_for(|| supervisor.state() == ConnectionState::Connected).await;
        wait_for(|| !simulation.is_running()).await;
        assert!(connector.attempts() >= 2);

        supervisor.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn geo_block_simulates_while_retrying_in_background() {
        let (supervisor, _connector, repository, simulation) = build(vec![Script::FailGeo], 1);

        supervisor.start().unwrap();

        wait_for(|| simulation.is_running()).await;
        assert_eq!(supervisor.state(), ConnectionState::Simulating);

        // simulated prices flow while blocked
        wait_for(|| !repository.is_empty()).await;
        let record = repository.get_all().into_iter().next().unwrap();
        assert_eq!(record.source, PriceSource::Simulated);

        // recovery stops the fallback
        wait_for(|| supervisor.state() == ConnectionState::Connected).await;
        wait_for(|| !simulation.is_running()).await;

        supervisor.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn connected_feed_reports_connected_state() {
        let (supervisor, connector, _repo, simulation) = build(vec![Script::Open], 2);

        supervisor.start().unwrap();
        wait_for(|| supervisor.state() == ConnectionState::Connected).await;
        assert!(!simulation.is_running());
        assert_eq!(connector.attempts(), 1);

        supervisor.stop().await;
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_twice_is_a_noop() {
        let (supervisor, connector, _repo, _sim) = build(vec![Script::Open], 1);

        supervisor.start().unwrap();
        supervisor.start().unwrap();
        wait_for(|| supervisor.state() == ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 1);

        supervisor.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_is_idempotent_and_safe_before_start() {
        let (supervisor, _connector, _repo, simulation) = build(vec![Script::FailGeo], 1);

        // before start: no-op
        supervisor.stop().await;
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);

        supervisor.start().unwrap();
        wait_for(|| simulation.is_running()).await;

        supervisor.stop().await;
        supervisor.stop().await;
        assert!(!simulation.is_running());
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restart_after_stop_resumes() {
        let (supervisor, connector, _repo, _sim) = build(vec![Script::Open, Script::Open], 1);

        supervisor.start().unwrap();
        wait_for(|| supervisor.state() == ConnectionState::Connected).await;
        supervisor.stop().await;

        supervisor.start().unwrap();
        wait_for(|| supervisor.state() == ConnectionState::Connected).await;
        assert_eq!(connector.attempts(), 2);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn empty_pool_is_rejected_at_start() {
        let (supervisor, _connector, _repo, _sim) = build(Vec::new(), 0);
        assert!(matches!(supervisor.start(), Err(Error::EmptyProxyPool)));
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn empty_symbol_list_is_rejected_at_start() {
        let repository = Arc::new(PriceRepository::new());
        let simulation = Arc::new(SimulationEngine::new(
            repository.clone(),
            SimulationConfig::default(),
        ));
        let supervisor = ConnectionSupervisor::new(
            FeedConfig { symbols: Vec::new(), ..test_config() },
            proxies(1),
            repository,
            simulation,
            FakeConnector::new(Vec::new()),
        );
        assert!(matches!(supervisor.start(), Err(Error::NoSymbols)));
    }
}
