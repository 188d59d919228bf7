use crate::events::price::PriceRecord;
use crate::feed::repository::{PriceRepository, UpdateHandler};
use crate::types::ids::SubscriptionId;

/// The narrow surface the rest of the application consumes: current prices
/// plus subscription hooks. REST handlers and UI pollers take this trait,
/// not the repository type.
pub trait PriceFeed: Send + Sync {
    fn price(&self, symbol: &str) -> Option<PriceRecord>;
    fn all_prices(&self) -> Vec<PriceRecord>;
    fn top_currencies(&self, n: usize) -> Vec<PriceRecord>;
    fn on_price_update(&self, handler: UpdateHandler) -> SubscriptionId;
    fn on_significant_change(&self, handler: UpdateHandler) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

impl PriceFeed for PriceRepository {
    fn price(&self, symbol: &str) -> Option<PriceRecord> {
        self.get(symbol)
    }

    fn all_prices(&self) -> Vec<PriceRecord> {
        self.get_all()
    }

    fn top_currencies(&self, n: usize) -> Vec<PriceRecord> {
        self.get_top(n)
    }

    fn on_price_update(&self, handler: UpdateHandler) -> SubscriptionId {
        PriceRepository::on_price_update(self, handler)
    }

    fn on_significant_change(&self, handler: UpdateHandler) -> SubscriptionId {
        PriceRepository::on_significant_change(self, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        PriceRepository::unsubscribe(self, id)
    }
}
