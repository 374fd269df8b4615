use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction as recorded by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// One historical trade, exactly as persisted in the per-asset position
/// files. All monetary fields are decimal-as-text on disk; `Decimal`'s serde
/// support parses them at the record boundary, so a malformed number rejects
/// the whole record instead of leaking a NaN into downstream math.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Transaction {
    /// Epoch milliseconds, text-encoded.
    pub time: String,
    pub activity: Side,
    pub symbol: String,
    #[serde(default)]
    pub trade_symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub commission: Decimal,
    #[serde(default)]
    pub commission_asset: String,
    #[serde(default)]
    pub commission_as_usdt: Decimal,
    #[serde(default)]
    pub round_id: String,
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub trade_id: String,
    #[serde(default)]
    pub closed_trade_ids: Vec<String>,
}

impl Transaction {
    /// Numeric timestamp in epoch milliseconds, `None` when the text is not
    /// a valid integer.
    pub fn timestamp_ms(&self) -> Option<i64> {
        self.time.parse().ok()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp_ms().and_then(DateTime::from_timestamp_millis)
    }
}

/// Current holding state for one asset symbol.
///
/// `open_quantity == 0` means nothing is currently held; `open_cost` and
/// `realized_gain` remain meaningful lifetime totals in that case.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Position {
    pub open_quantity: Decimal,
    pub open_cost: Decimal,
    pub realized_gain: Decimal,
    #[serde(default)]
    pub total_commission_as_usdt: Decimal,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Position {
    /// A record with no trading history never enters the active asset set.
    pub fn has_transactions(&self) -> bool {
        !self.transactions.is_empty()
    }
}
