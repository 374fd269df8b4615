use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::price_provider::PriceProvider;

/// Quote currency appended to every asset symbol for the external request.
pub const QUOTE_ASSET: &str = "USDT";

/// How long a fetched price stays valid. The ticker endpoint is rate
/// limited, so lookups inside this window are served from the cache.
const PRICE_CACHE_TTL: Duration = Duration::from_secs(30);

fn trading_pair(symbol: &str) -> String {
    format!("{}{}", symbol.to_uppercase(), QUOTE_ASSET)
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: Decimal,
    fetched_at: Instant,
}

impl CachedPrice {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Price provider backed by the Binance public ticker API.
///
/// The cache is keyed by trading pair and shared by every caller holding the
/// provider; entries expire after [`PRICE_CACHE_TTL`] or on an explicit
/// [`clear_cache`](BinanceProvider::clear_cache).
pub struct BinanceProvider {
    base_url: String,
    client: reqwest::Client,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedPrice>>,
}

#[derive(Deserialize, Debug)]
struct TickerPrice {
    symbol: String,
    price: Decimal,
}

impl BinanceProvider {
    pub fn new(base_url: &str) -> Self {
        BinanceProvider {
            base_url: base_url.to_string(),
            client: reqwest::Client::new(),
            ttl: PRICE_CACHE_TTL,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Override the cache TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Drops every cached entry; the next lookup goes to the network.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    async fn cached(&self, pair: &str) -> Option<Decimal> {
        let cache = self.cache.lock().await;
        match cache.get(pair) {
            Some(entry) if entry.is_fresh(self.ttl) => {
                debug!(pair, "price cache hit");
                Some(entry.price)
            }
            _ => {
                debug!(pair, "price cache miss");
                None
            }
        }
    }

    async fn remember(&self, pair: String, price: Decimal) {
        let mut cache = self.cache.lock().await;
        cache.insert(
            pair,
            CachedPrice {
                price,
                fetched_at: Instant::now(),
            },
        );
    }

    /// One request for every uncached pair. The response carries trading
    /// pairs; they are mapped back to the caller's symbols before returning.
    async fn fetch_batch(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        let by_pair: HashMap<String, &String> = symbols
            .iter()
            .map(|symbol| (trading_pair(symbol), symbol))
            .collect();
        let pairs_param = format!(
            "[{}]",
            symbols
                .iter()
                .map(|symbol| format!("\"{}\"", trading_pair(symbol)))
                .collect::<Vec<_>>()
                .join(",")
        );

        let url = format!("{}/api/v3/ticker/price", self.base_url);
        debug!("Requesting batch prices from {} for {}", url, pairs_param);

        let response = self
            .client
            .get(&url)
            .query(&[("symbols", pairs_param.as_str())])
            .send()
            .await
            .map_err(|e| anyhow!("Request error: {} for batch of {} symbols", e, symbols.len()))?;

        if !response.status().is_success() {
            bail!("HTTP error: {} for batch price request", response.status());
        }

        let tickers = response.json::<Vec<TickerPrice>>().await?;

        let mut prices = HashMap::new();
        for ticker in tickers {
            let Some(symbol) = by_pair.get(&ticker.symbol) else {
                continue;
            };
            prices.insert((*symbol).clone(), ticker.price);
            self.remember(ticker.symbol, ticker.price).await;
        }
        Ok(prices)
    }
}

#[async_trait]
impl PriceProvider for BinanceProvider {
    #[instrument(name = "BinancePriceFetch", skip(self), fields(symbol = %symbol))]
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal> {
        let pair = trading_pair(symbol);
        if let Some(price) = self.cached(&pair).await {
            return Ok(price);
        }

        let url = format!("{}/api/v3/ticker/price", self.base_url);
        debug!("Requesting price from {} for {}", url, pair);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", pair.as_str())])
            .send()
            .await
            .map_err(|e| anyhow!("Request error: {} for symbol: {} URL: {}", e, symbol, url))?;

        if !response.status().is_success() {
            bail!("HTTP error: {} for symbol: {}", response.status(), symbol);
        }

        let ticker = response.json::<TickerPrice>().await?;
        self.remember(pair, ticker.price).await;

        Ok(ticker.price)
    }

    async fn fetch_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        let mut prices = HashMap::new();
        let mut uncached = Vec::new();
        {
            let cache = self.cache.lock().await;
            for symbol in symbols {
                let pair = trading_pair(symbol);
                match cache.get(&pair) {
                    Some(entry) if entry.is_fresh(self.ttl) => {
                        prices.insert(symbol.clone(), entry.price);
                    }
                    _ => uncached.push(symbol.clone()),
                }
            }
        }
        if uncached.is_empty() {
            return Ok(prices);
        }

        match self.fetch_batch(&uncached).await {
            Ok(batch) => {
                prices.extend(batch);
            }
            Err(batch_err) => {
                warn!(
                    error = %batch_err,
                    "batch price request failed, falling back to per-symbol lookups"
                );
                let lookups = uncached
                    .iter()
                    .map(|symbol| async move { (symbol.clone(), self.fetch_price(symbol).await) });
                for (symbol, result) in join_all(lookups).await {
                    match result {
                        Ok(price) => {
                            prices.insert(symbol, price);
                        }
                        Err(e) => warn!(symbol = %symbol, error = %e, "price lookup failed"),
                    }
                }
                if prices.is_empty() {
                    return Err(batch_err.context("every per-symbol fallback failed too"));
                }
            }
        }

        Ok(prices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TICKER_PATH: &str = "/api/v3/ticker/price";

    async fn mount_single(server: &MockServer, pair: &str, price: &str, calls: u64) {
        let body = format!(r#"{{"symbol": "{pair}", "price": "{price}"}}"#);
        Mock::given(method("GET"))
            .and(path(TICKER_PATH))
            .and(query_param("symbol", pair))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_single_price_fetch() {
        let server = MockServer::start().await;
        mount_single(&server, "BTCUSDT", "50000.00", 1).await;

        let provider = BinanceProvider::new(&server.uri());
        let price = provider.fetch_price("BTC").await.unwrap();
        assert_eq!(price, dec!(50000.00));
    }

    #[tokio::test]
    async fn test_symbol_is_uppercased_for_the_pair() {
        let server = MockServer::start().await;
        mount_single(&server, "ETHUSDT", "3000", 1).await;

        let provider = BinanceProvider::new(&server.uri());
        let price = provider.fetch_price("eth").await.unwrap();
        assert_eq!(price, dec!(3000));
    }

    #[tokio::test]
    async fn test_second_lookup_within_ttl_is_cached() {
        let server = MockServer::start().await;
        mount_single(&server, "BTCUSDT", "50000", 1).await;

        let provider = BinanceProvider::new(&server.uri());
        assert_eq!(provider.fetch_price("BTC").await.unwrap(), dec!(50000));
        assert_eq!(provider.fetch_price("BTC").await.unwrap(), dec!(50000));
        // expect(1) on the mock verifies a single external call on drop.
    }

    #[tokio::test]
    async fn test_lookup_after_ttl_expiry_calls_again() {
        let server = MockServer::start().await;
        mount_single(&server, "BTCUSDT", "50000", 2).await;

        let provider =
            BinanceProvider::new(&server.uri()).with_ttl(Duration::from_millis(50));
        provider.fetch_price("BTC").await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        provider.fetch_price("BTC").await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refetch() {
        let server = MockServer::start().await;
        mount_single(&server, "BTCUSDT", "50000", 2).await;

        let provider = BinanceProvider::new(&server.uri());
        provider.fetch_price("BTC").await.unwrap();
        provider.clear_cache().await;
        provider.fetch_price("BTC").await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_fetch() {
        let server = MockServer::start().await;
        let body = r#"[
            {"symbol": "BTCUSDT", "price": "50000"},
            {"symbol": "ETHUSDT", "price": "3000"}
        ]"#;
        Mock::given(method("GET"))
            .and(path(TICKER_PATH))
            .and(query_param("symbols", r#"["BTCUSDT","ETHUSDT"]"#))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let provider = BinanceProvider::new(&server.uri());
        let symbols = vec!["BTC".to_string(), "ETH".to_string()];
        let prices = provider.fetch_prices(&symbols).await.unwrap();
        assert_eq!(prices.get("BTC"), Some(&dec!(50000)));
        assert_eq!(prices.get("ETH"), Some(&dec!(3000)));
    }

    #[tokio::test]
    async fn test_batch_requests_only_uncached_symbols() {
        let server = MockServer::start().await;
        mount_single(&server, "BTCUSDT", "50000", 1).await;
        Mock::given(method("GET"))
            .and(path(TICKER_PATH))
            .and(query_param("symbols", r#"["ETHUSDT"]"#))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"[{"symbol": "ETHUSDT", "price": "3000"}]"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = BinanceProvider::new(&server.uri());
        provider.fetch_price("BTC").await.unwrap();

        let symbols = vec!["BTC".to_string(), "ETH".to_string()];
        let prices = provider.fetch_prices(&symbols).await.unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices.get("BTC"), Some(&dec!(50000)));
    }

    #[tokio::test]
    async fn test_batch_failure_falls_back_to_per_symbol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TICKER_PATH))
            .and(query_param("symbols", r#"["BTCUSDT","ETHUSDT"]"#))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_single(&server, "BTCUSDT", "50000", 1).await;
        Mock::given(method("GET"))
            .and(path(TICKER_PATH))
            .and(query_param("symbol", "ETHUSDT"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let provider = BinanceProvider::new(&server.uri());
        let symbols = vec!["BTC".to_string(), "ETH".to_string()];

        // Partial fallback success: BTC resolves, ETH is omitted, no error.
        let prices = provider.fetch_prices(&symbols).await.unwrap();
        assert_eq!(prices.get("BTC"), Some(&dec!(50000)));
        assert!(!prices.contains_key("ETH"));
    }

    #[tokio::test]
    async fn test_total_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(TICKER_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider = BinanceProvider::new(&server.uri());
        let symbols = vec!["BTC".to_string(), "ETH".to_string()];
        assert!(provider.fetch_prices(&symbols).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_symbol_list_makes_no_request() {
        let server = MockServer::start().await;
        let provider = BinanceProvider::new(&server.uri());
        let prices = provider.fetch_prices(&[]).await.unwrap();
        assert!(prices.is_empty());
    }
}
