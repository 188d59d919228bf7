use lazy_static::lazy_static;
use prometheus::{Counter, IntGauge, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Repository metrics
    pub static ref PRICE_UPDATES: Counter = Counter::new(
        "price_updates_total",
        "Total number of price updates applied to the repository"
    ).unwrap();

    pub static ref SIGNIFICANT_CHANGES: Counter = Counter::new(
        "significant_changes_total",
        "Total number of significant price moves published"
    ).unwrap();

    // Stream metrics
    pub static ref FRAMES_DROPPED: Counter = Counter::new(
        "frames_dropped_total",
        "Total number of malformed ticker frames dropped"
    ).unwrap();

    pub static ref CONNECT_ATTEMPTS: Counter = Counter::new(
        "connect_attempts_total",
        "Total number of stream connection attempts"
    ).unwrap();

    pub static ref RECONNECTS_SCHEDULED: Counter = Counter::new(
        "reconnects_scheduled_total",
        "Total number of reconnects scheduled after a failure"
    ).unwrap();

    pub static ref PROXY_ROTATIONS: Counter = Counter::new(
        "proxy_rotations_total",
        "Total number of proxy rotations after auth failures"
    ).unwrap();

    pub static ref FEED_CONNECTED: IntGauge = IntGauge::new(
        "feed_connected",
        "1 while the live ticker stream is open"
    ).unwrap();

    // Simulation metrics
    pub static ref SIMULATION_ACTIVE: IntGauge = IntGauge::new(
        "simulation_active",
        "1 while the simulated price feed is running"
    ).unwrap();

    pub static ref SIMULATION_TICKS: Counter = Counter::new(
        "simulation_ticks_total",
        "Total number of simulation ticks applied"
    ).unwrap();
}

pub fn register_metrics() {
    REGISTRY.register(Box::new(PRICE_UPDATES.clone())).unwrap();
    REGISTRY.register(Box::new(SIGNIFICANT_CHANGES.clone())).unwrap();
    REGISTRY.register(Box::new(FRAMES_DROPPED.clone())).unwrap();
    REGISTRY.register(Box::new(CONNECT_ATTEMPTS.clone())).unwrap();
    REGISTRY.register(Box::new(RECONNECTS_SCHEDULED.clone())).unwrap();
    REGISTRY.register(Box::new(PROXY_ROTATIONS.clone())).unwrap();
    REGISTRY.register(Box::new(FEED_CONNECTED.clone())).unwrap();
    REGISTRY.register(Box::new(SIMULATION_ACTIVE.clone())).unwrap();
    REGISTRY.register(Box::new(SIMULATION_TICKS.clone())).unwrap();
}
