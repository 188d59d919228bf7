use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::events::price::{PriceRecord, PriceSource, PriceUpdateEvent};
use crate::observability::metrics;
use crate::types::ids::SubscriptionId;
use crate::types::symbol;
use crate::utils::helper::current_timestamp_ms;

pub type UpdateHandler = Box<dyn Fn(&PriceUpdateEvent) + Send + Sync>;

#[derive(Default)]
struct SubscriberRegistry {
    any: Vec<(SubscriptionId, UpdateHandler)>,
    per_symbol: HashMap<String, Vec<(SubscriptionId, UpdateHandler)>>,
    significant: Vec<(SubscriptionId, UpdateHandler)>,
}

/// Shared in-memory price store. Written by the live stream and the
/// simulation engine through the same interface, read by everything else.
/// Fan-out is synchronous and in registration order; slow consumers are
/// expected to copy and queue, not block.
pub struct PriceRepository {
    records: DashMap<String, PriceRecord>,
    subscribers: RwLock<SubscriberRegistry>,
}

impl PriceRepository {
    pub fn new() -> Self {
        PriceRepository {
            records: DashMap::new(),
            subscribers: RwLock::new(SubscriberRegistry::default()),
        }
    }

    /// Apply one price update and publish it. Non-finite and non-positive
    /// prices are dropped silently: no record, no event.
    pub fn update(&self, symbol: &str, price: f64, source: PriceSource) {
        if !price.is_finite() || price <= 0.0 {
            tracing::debug!("Dropping invalid price for {}: {}", symbol, price);
            return;
        }

        let timestamp = current_timestamp_ms();
        let record = PriceRecord {
            symbol: symbol.to_string(),
            price,
            updated_at: timestamp,
            source,
        };
        let previous_price = self.records.insert(symbol.to_string(), record).map(|r| r.price);

        let price_change = previous_price.map(|p| price - p).unwrap_or(0.0);
        let percent_change = match previous_price {
            Some(p) if p != 0.0 => price_change / p * 100.0,
            _ => 0.0,
        };

        let event = PriceUpdateEvent {
            symbol: symbol.to_string(),
            price,
            previous_price,
            price_change,
            percent_change,
            timestamp,
            source,
        };

        metrics::PRICE_UPDATES.inc();
        self.publish(&event);
    }

    fn publish(&self, event: &PriceUpdateEvent) {
        let registry = self.subscribers.read().unwrap();

        for (_, handler) in &registry.any {
            handler(event);
        }
        if let Some(handlers) = registry.per_symbol.get(&event.symbol) {
            for (_, handler) in handlers {
                handler(event);
            }
        }
        if event.is_significant() {
            metrics::SIGNIFICANT_CHANGES.inc();
            for (_, handler) in &registry.significant {
                handler(event);
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<PriceRecord> {
        self.records.get(symbol).map(|r| r.value().clone())
    }

    /// Unordered snapshot of every record
    pub fn get_all(&self) -> Vec<PriceRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    /// Top `n` USDT-quoted symbols by price, descending
    pub fn get_top(&self, n: usize) -> Vec<PriceRecord> {
        self.get_top_by_quote(n, "USDT")
    }

    pub fn get_top_by_quote(&self, n: usize, quote: &str) -> Vec<PriceRecord> {
        let mut records: Vec<PriceRecord> = self
            .records
            .iter()
            .filter(|r| symbol::is_quoted_in(&r.symbol, quote))
            .map(|r| r.value().clone())
            .collect();
        // prices are validated finite on the way in
        records.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap());
        records.truncate(n);
        records
    }

    pub fn on_price_update<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&PriceUpdateEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.subscribers.write().unwrap().any.push((id, Box::new(handler)));
        id
    }

    pub fn on_symbol<F>(&self, symbol: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&PriceUpdateEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.subscribers
            .write()
            .unwrap()
            .per_symbol
            .entry(symbol.to_string())
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    pub fn on_significant_change<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&PriceUpdateEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.subscribers.write().unwrap().significant.push((id, Box::new(handler)));
        id
    }

    /// Drop a handler from whichever channel it was registered on
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.subscribers.write().unwrap();
        let before = registry.any.len()
            + registry.significant.len()
            + registry.per_symbol.values().map(Vec::len).sum::<usize>();

        registry.any.retain(|(sid, _)| *sid != id);
        registry.significant.retain(|(sid, _)| *sid != id);
        for handlers in registry.per_symbol.values_mut() {
            handlers.retain(|(sid, _)| *sid != id);
        }

        let after = registry.any.len()
            + registry.significant.len()
            + registry.per_symbol.values().map(Vec::len).sum::<usize>();
        before != after
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for PriceRepository {
    fn default() -> Self {
        Self::new()
    }
}
