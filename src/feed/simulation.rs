use lazy_static::lazy_static;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::config::SimulationConfig;
use crate::events::price::{PriceRecord, PriceSource};
use crate::feed::repository::PriceRepository;
use crate::observability::metrics;
use crate::observability::tracing::trace_simulation_tick;
use crate::utils::helper::current_timestamp_ms;

lazy_static! {
    // Seed prices for the majors, used when no live quote was ever observed
    static ref DEFAULT_PRICES: Vec<(&'static str, f64)> = vec![
        ("BTCUSDT", 97_000.0),
        ("ETHUSDT", 3_350.0),
        ("BNBUSDT", 690.0),
        ("SOLUSDT", 210.0),
        ("XRPUSDT", 2.40),
        ("ADAUSDT", 0.95),
        ("DOGEUSDT", 0.32),
        ("AVAXUSDT", 38.0),
        ("DOTUSDT", 6.80),
        ("LINKUSDT", 21.0),
        ("MATICUSDT", 0.48),
        ("LTCUSDT", 105.0),
        ("TRXUSDT", 0.26),
        ("SHIBUSDT", 0.000022),
        ("UNIUSDT", 13.0),
        ("ATOMUSDT", 6.40),
        ("XLMUSDT", 0.41),
        ("NEARUSDT", 5.10),
        ("APTUSDT", 9.20),
        ("FILUSDT", 5.00),
    ];
}

struct SimulationState {
    handle: JoinHandle<()>,
    started_at: u64,
}

/// Synthetic price feed: a bounded random walk over the tracked symbols,
/// writing into the repository through the same interface the live stream
/// uses. No drift term, so the long-run expectation stays at the seed.
pub struct SimulationEngine {
    repository: Arc<PriceRepository>,
    config: SimulationConfig,
    state: Mutex<Option<SimulationState>>,
}

impl SimulationEngine {
    pub fn new(repository: Arc<PriceRepository>, config: SimulationConfig) -> Self {
        SimulationEngine {
            repository,
            config,
            state: Mutex::new(None),
        }
    }

    /// Start ticking. No-op when already running. `seed` carries the last
    /// known real prices; an empty seed falls back to the default table.
    /// The first tick fires immediately.
    pub fn start(&self, seed: Vec<PriceRecord>) {
        let mut state = self.state.lock().unwrap();
        if state.as_ref().map(|s| !s.handle.is_finished()).unwrap_or(false) {
            tracing::debug!("Simulation already running");
            return;
        }

        let mut last_prices: HashMap<String, f64> = seed
            .into_iter()
            .filter(|r| r.price > 0.0)
            .map(|r| (r.symbol, r.price))
            .collect();
        if last_prices.is_empty() {
            last_prices = DEFAULT_PRICES
                .iter()
                .map(|(symbol, price)| (symbol.to_string(), *price))
                .collect();
        }

        tracing::warn!("Starting simulated price feed for {} symbols", last_prices.len());
        metrics::SIMULATION_ACTIVE.set(1);

        let repository = self.repository.clone();
        let tick_interval = self.config.tick_interval();
        let max_step = self.config.max_step_pct / 100.0;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            loop {
                ticker.tick().await;
                tick(&repository, &mut last_prices, max_step);
            }
        });

        *state = Some(SimulationState {
            handle,
            started_at: current_timestamp_ms(),
        });
    }

    /// Cancel the tick task. No-op when not running.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(state) = state.take() {
            state.handle.abort();
            metrics::SIMULATION_ACTIVE.set(0);
            tracing::info!("Stopped simulated price feed");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| !s.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn started_at(&self) -> Option<u64> {
        self.state.lock().unwrap().as_ref().map(|s| s.started_at)
    }
}

fn tick(repository: &PriceRepository, last_prices: &mut HashMap<String, f64>, max_step: f64) {
    let _span = trace_simulation_tick(last_prices.len()).entered();
    let mut rng = rand::thread_rng();

    for (symbol, price) in last_prices.iter_mut() {
        *price = next_price(*price, max_step, &mut rng);
        repository.update(symbol, *price, PriceSource::Simulated);
    }
    metrics::SIMULATION_TICKS.inc();
}

/// One random-walk step: a uniform perturbation within ±`max_step` (as a
/// fraction) of the current price. A positive input stays positive.
fn next_price(current: f64, max_step: f64, rng: &mut impl Rng) -> f64 {
    let step = rng.gen_range(-max_step..=max_step);
    current * (1.0 + step)
}
