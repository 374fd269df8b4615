use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::position::{Position, Side, Transaction};

/// Derived per-asset figures, recomputed on every read and never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetrics {
    pub open_quantity: Decimal,
    pub open_cost: Decimal,
    pub realized_gain: Decimal,
    pub total_commission: Decimal,
    pub avg_buy_price: Decimal,
    pub total_transactions: usize,
    pub buy_transactions: usize,
    pub sell_transactions: usize,
    #[serde(rename = "firstTransactionDate")]
    pub first_transaction: Option<DateTime<Utc>>,
    #[serde(rename = "lastTransactionDate")]
    pub last_transaction: Option<DateTime<Utc>>,
}

/// Computes metrics for one position. Pure: no I/O, no hidden state, and the
/// same input always produces the same output.
pub fn compute_metrics(position: &Position) -> AssetMetrics {
    let avg_buy_price = if position.open_quantity > Decimal::ZERO {
        position.open_cost / position.open_quantity
    } else {
        Decimal::ZERO
    };

    let buy_transactions = count_side(&position.transactions, Side::Buy);
    let sell_transactions = count_side(&position.transactions, Side::Sell);

    // Timestamps are integer text; compare them numerically, never as
    // strings ("999999999" sorts after "1000000000" lexicographically).
    // A transaction whose time fails to parse contributes no date.
    let timestamps: Vec<i64> = position
        .transactions
        .iter()
        .filter_map(Transaction::timestamp_ms)
        .collect();
    let first_transaction = timestamps
        .iter()
        .min()
        .copied()
        .and_then(DateTime::from_timestamp_millis);
    let last_transaction = timestamps
        .iter()
        .max()
        .copied()
        .and_then(DateTime::from_timestamp_millis);

    AssetMetrics {
        open_quantity: position.open_quantity,
        open_cost: position.open_cost,
        realized_gain: position.realized_gain,
        total_commission: position.total_commission_as_usdt,
        avg_buy_price,
        total_transactions: position.transactions.len(),
        buy_transactions,
        sell_transactions,
        first_transaction,
        last_transaction,
    }
}

fn count_side(transactions: &[Transaction], side: Side) -> usize {
    transactions.iter().filter(|t| t.activity == side).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn transaction(time: &str, side: Side) -> Transaction {
        Transaction {
            time: time.to_string(),
            activity: side,
            symbol: "BTC".to_string(),
            trade_symbol: "BTCUSDT".to_string(),
            quantity: dec!(1),
            price: dec!(100),
            commission: Decimal::ZERO,
            commission_asset: String::new(),
            commission_as_usdt: Decimal::ZERO,
            round_id: String::new(),
            order_id: String::new(),
            trade_id: String::new(),
            closed_trade_ids: Vec::new(),
        }
    }

    fn position(quantity: Decimal, cost: Decimal, transactions: Vec<Transaction>) -> Position {
        Position {
            open_quantity: quantity,
            open_cost: cost,
            realized_gain: dec!(50),
            total_commission_as_usdt: dec!(2),
            transactions,
        }
    }

    #[test]
    fn test_avg_buy_price() {
        let metrics = compute_metrics(&position(
            dec!(2.5),
            dec!(1000),
            vec![transaction("1700000000000", Side::Buy)],
        ));
        assert_eq!(metrics.avg_buy_price, dec!(400));
    }

    #[test]
    fn test_zero_quantity_has_zero_avg_price() {
        // Closed-out position keeps its historical cost; the average must
        // not divide by zero.
        let metrics = compute_metrics(&position(Decimal::ZERO, dec!(1000), Vec::new()));
        assert_eq!(metrics.avg_buy_price, Decimal::ZERO);
        assert_eq!(metrics.open_cost, dec!(1000));
    }

    #[test]
    fn test_transaction_counts() {
        let metrics = compute_metrics(&position(
            dec!(1),
            dec!(100),
            vec![
                transaction("1", Side::Buy),
                transaction("2", Side::Buy),
                transaction("3", Side::Sell),
            ],
        ));
        assert_eq!(metrics.total_transactions, 3);
        assert_eq!(metrics.buy_transactions, 2);
        assert_eq!(metrics.sell_transactions, 1);
    }

    #[test]
    fn test_dates_compare_numerically() {
        // "999999999" > "1000000000" as strings; numerically it is earlier.
        let metrics = compute_metrics(&position(
            dec!(1),
            dec!(100),
            vec![
                transaction("1000000000", Side::Buy),
                transaction("999999999", Side::Sell),
            ],
        ));
        let first = metrics.first_transaction.unwrap();
        let last = metrics.last_transaction.unwrap();
        assert!(first <= last);
        assert_eq!(first.timestamp_millis(), 999999999);
        assert_eq!(last.timestamp_millis(), 1000000000);
    }

    #[test]
    fn test_empty_transactions_have_no_dates() {
        let metrics = compute_metrics(&position(dec!(1), dec!(100), Vec::new()));
        assert!(metrics.first_transaction.is_none());
        assert!(metrics.last_transaction.is_none());
    }

    #[test]
    fn test_unparseable_time_skipped() {
        let metrics = compute_metrics(&position(
            dec!(1),
            dec!(100),
            vec![
                transaction("not-a-timestamp", Side::Buy),
                transaction("1700000000000", Side::Buy),
            ],
        ));
        assert_eq!(
            metrics.first_transaction.unwrap().timestamp_millis(),
            1700000000000
        );
        assert_eq!(metrics.total_transactions, 2);
    }

    #[test]
    fn test_compute_is_pure() {
        let position = position(
            dec!(2.5),
            dec!(1000),
            vec![
                transaction("1700000000000", Side::Buy),
                transaction("1700000100000", Side::Sell),
            ],
        );
        let a = compute_metrics(&position);
        let b = compute_metrics(&position);
        assert_eq!(a.avg_buy_price, b.avg_buy_price);
        assert_eq!(a.first_transaction, b.first_transaction);
        assert_eq!(a.last_transaction, b.last_transaction);
        assert_eq!(a.total_transactions, b.total_transactions);
    }
}
