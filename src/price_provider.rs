use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Source of current market prices in the quote currency.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Price for a single symbol.
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal>;

    /// Prices for a set of symbols. Symbols that cannot be resolved are
    /// omitted from the map; `Err` means no symbol could be resolved at all.
    async fn fetch_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>>;
}
