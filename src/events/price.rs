use serde::{Deserialize, Serialize};

/// Where a price came from. Carried on every record and event so consumers
/// can badge simulated data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    LiveFeed,
    Simulated,
}

/// Latest known price for one symbol. At most one record per symbol lives in
/// the repository; updates replace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceRecord {
    pub symbol: String,
    pub price: f64,
    pub updated_at: u64,
    pub source: PriceSource,
}

/// Published on every accepted update. Ephemeral, never persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceUpdateEvent {
    pub symbol: String,
    pub price: f64,
    pub previous_price: Option<f64>,
    pub price_change: f64,
    pub percent_change: f64,
    pub timestamp: u64,
    pub source: PriceSource,
}

impl PriceUpdateEvent {
    pub fn is_significant(&self) -> bool {
        self.percent_change.abs() >= crate::SIGNIFICANT_CHANGE_PCT
    }
}

/// Parsed inbound ticker payload, re-broadcast on the connection-local
/// channel for symbol-specific listeners
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TickerUpdate {
    pub symbol: String,
    pub price: f64,
    pub percent_change_24h: f64,
    pub event_time: u64,
}
