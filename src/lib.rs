pub mod config;
pub mod log;
pub mod metrics;
pub mod portfolio;
pub mod position;
pub mod price_provider;
pub mod providers;
pub mod server;
pub mod store;
pub mod ui;
pub mod watcher;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use crate::config::AppConfig;
use crate::portfolio::enrich_portfolio;
use crate::price_provider::PriceProvider;
use crate::providers::binance::BinanceProvider;
use crate::store::PositionStore;
use crate::watcher::PositionWatcher;

pub enum AppCommand {
    Serve,
    Summary,
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let store = PositionStore::new(&config.positions_path);
    let provider: Arc<dyn PriceProvider> =
        Arc::new(BinanceProvider::new(config.binance_base_url()));

    match command {
        AppCommand::Summary => {
            // A one-shot summary must not silently print an empty portfolio
            // when the data source is unreachable.
            store
                .reload()
                .await
                .context("Failed to load asset positions")?;
            let positions = store.positions().await;

            let pb = ui::new_spinner("Fetching prices...");
            let view = enrich_portfolio(&positions, provider.as_ref()).await;
            pb.finish_and_clear();

            println!("{}", view.display_as_table());
            Ok(())
        }
        AppCommand::Serve => {
            info!("Portfolio dashboard API starting...");
            if let Err(e) = store.reload().await {
                error!(error = %e, "initial position load failed, serving an empty cache");
            }

            let watcher = PositionWatcher::new(&config.positions_path, store.clone());
            tokio::spawn(async move {
                if let Err(e) = watcher.run().await {
                    error!(error = %e, "file watcher stopped");
                }
            });

            server::serve(&config, store, provider).await
        }
    }
}
