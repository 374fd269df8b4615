use std::collections::HashMap;

use chrono::{DateTime, Utc};
use comfy_table::Cell;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;

use crate::metrics::{AssetMetrics, compute_metrics};
use crate::position::Position;
use crate::price_provider::PriceProvider;
use crate::providers::binance::QUOTE_ASSET;
use crate::ui;

/// A position's metrics joined with the live market view. Field names on
/// the wire match what the dashboard front-end expects.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedAsset {
    pub symbol: String,
    #[serde(flatten)]
    pub metrics: AssetMetrics,
    /// Absent when the price lookup failed for this symbol.
    pub current_price: Option<Decimal>,
    pub current_value: Decimal,
    #[serde(rename = "unrealizedPnL")]
    pub unrealized_pnl: Decimal,
    #[serde(rename = "unrealizedPnLPercent")]
    pub unrealized_pnl_percent: Decimal,
    #[serde(rename = "totalPnL")]
    pub total_pnl: Decimal,
    #[serde(rename = "totalPnLPercent")]
    pub total_pnl_percent: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub total_current_value: Decimal,
    pub total_cost: Decimal,
    #[serde(rename = "totalRealizedPnL")]
    pub total_realized_pnl: Decimal,
    #[serde(rename = "totalUnrealizedPnL")]
    pub total_unrealized_pnl: Decimal,
    #[serde(rename = "totalPnL")]
    pub total_pnl: Decimal,
    #[serde(rename = "totalPnLPercent")]
    pub total_pnl_percent: Decimal,
    /// Set only when the last price lookup succeeded.
    pub last_price_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioView {
    pub assets: Vec<EnrichedAsset>,
    pub summary: PortfolioSummary,
    /// Human-readable message when no price could be resolved at all. The
    /// asset figures are still complete, computed from cost basis.
    pub price_error: Option<String>,
}

/// Joins every position with its live market price and aggregates the
/// portfolio totals. Awaits the price provider exactly once; a total price
/// failure degrades every asset to cost basis instead of failing the view.
pub async fn enrich_portfolio(
    positions: &HashMap<String, Position>,
    provider: &dyn PriceProvider,
) -> PortfolioView {
    let mut symbols: Vec<String> = positions.keys().cloned().collect();
    symbols.sort();

    let (prices, price_error, last_price_update) = if symbols.is_empty() {
        (HashMap::new(), None, None)
    } else {
        match provider.fetch_prices(&symbols).await {
            Ok(prices) => (prices, None, Some(Utc::now())),
            Err(e) => {
                warn!(error = %e, "price lookup failed for every asset, using cost basis");
                (HashMap::new(), Some(e.to_string()), None)
            }
        }
    };

    let assets: Vec<EnrichedAsset> = symbols
        .iter()
        .map(|symbol| enrich_asset(symbol, &positions[symbol], prices.get(symbol).copied()))
        .collect();
    let summary = summarize(&assets, last_price_update);

    PortfolioView {
        assets,
        summary,
        price_error,
    }
}

fn enrich_asset(
    symbol: &str,
    position: &Position,
    current_price: Option<Decimal>,
) -> EnrichedAsset {
    let metrics = compute_metrics(position);

    match current_price {
        Some(price) => {
            let current_value = metrics.open_quantity * price;
            let cost_basis = metrics.open_quantity * metrics.avg_buy_price;
            let unrealized_pnl = current_value - cost_basis;
            let unrealized_pnl_percent = percent_of(unrealized_pnl, cost_basis);
            let total_pnl = metrics.realized_gain + unrealized_pnl;
            let total_pnl_percent = percent_of(total_pnl, metrics.open_cost);
            EnrichedAsset {
                symbol: symbol.to_string(),
                current_price: Some(price),
                current_value,
                unrealized_pnl,
                unrealized_pnl_percent,
                total_pnl,
                total_pnl_percent,
                metrics,
            }
        }
        None => {
            // Cost-basis fallback: the holding is valued at what it cost,
            // so only the realized part of the P&L is reported.
            let total_pnl_percent = percent_of(metrics.realized_gain, metrics.open_cost);
            EnrichedAsset {
                symbol: symbol.to_string(),
                current_price: None,
                current_value: metrics.open_cost,
                unrealized_pnl: Decimal::ZERO,
                unrealized_pnl_percent: Decimal::ZERO,
                total_pnl: metrics.realized_gain,
                total_pnl_percent,
                metrics,
            }
        }
    }
}

fn summarize(
    assets: &[EnrichedAsset],
    last_price_update: Option<DateTime<Utc>>,
) -> PortfolioSummary {
    let mut summary = PortfolioSummary {
        total_current_value: Decimal::ZERO,
        total_cost: Decimal::ZERO,
        total_realized_pnl: Decimal::ZERO,
        total_unrealized_pnl: Decimal::ZERO,
        total_pnl: Decimal::ZERO,
        total_pnl_percent: Decimal::ZERO,
        last_price_update,
    };
    for asset in assets {
        summary.total_current_value += asset.current_value;
        summary.total_cost += asset.metrics.open_cost;
        summary.total_realized_pnl += asset.metrics.realized_gain;
        summary.total_unrealized_pnl += asset.unrealized_pnl;
        summary.total_pnl += asset.total_pnl;
    }
    summary.total_pnl_percent = percent_of(summary.total_pnl, summary.total_cost);
    summary
}

fn percent_of(value: Decimal, base: Decimal) -> Decimal {
    if base > Decimal::ZERO {
        value / base * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    }
}

impl PortfolioView {
    pub fn display_as_table(&self) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Asset"),
            ui::header_cell("Holdings"),
            ui::header_cell("Avg Price"),
            ui::header_cell("Price"),
            ui::header_cell(&format!("Value ({QUOTE_ASSET})")),
            ui::header_cell("Unrealized P&L"),
            ui::header_cell("Total P&L"),
            ui::header_cell("P&L (%)"),
        ]);

        for asset in &self.assets {
            let price_cell = match asset.current_price {
                Some(price) => ui::value_cell(ui::format_price(price)),
                None => ui::na_cell(),
            };
            table.add_row(vec![
                Cell::new(&asset.symbol),
                ui::value_cell(asset.metrics.open_quantity.normalize().to_string()),
                ui::value_cell(ui::format_price(asset.metrics.avg_buy_price)),
                price_cell,
                ui::value_cell(format!("{:.2}", asset.current_value)),
                ui::signed_cell(
                    asset.unrealized_pnl,
                    format!("{:.2}", asset.unrealized_pnl),
                ),
                ui::signed_cell(asset.total_pnl, format!("{:.2}", asset.total_pnl)),
                ui::signed_cell(
                    asset.total_pnl_percent,
                    ui::format_percent(asset.total_pnl_percent),
                ),
            ]);
        }

        let mut output = table.to_string();
        output.push_str(&format!(
            "\n\n{} {}   {} {} ({})",
            ui::style_text(
                &format!("Total Value ({QUOTE_ASSET}):"),
                ui::StyleType::TotalLabel
            ),
            ui::style_text(
                &format!("{:.2}", self.summary.total_current_value),
                ui::StyleType::TotalValue
            ),
            ui::style_text("Total P&L:", ui::StyleType::TotalLabel),
            ui::style_text(
                &format!("{:.2}", self.summary.total_pnl),
                ui::StyleType::TotalValue
            ),
            ui::format_percent(self.summary.total_pnl_percent),
        ));

        if let Some(error) = &self.price_error {
            output.push_str(&format!(
                "\n{}",
                ui::style_text(
                    &format!("Prices unavailable, showing cost basis: {error}"),
                    ui::StyleType::Warning
                )
            ));
        }

        output
    }
}
