use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::portfolio::{PortfolioView, enrich_portfolio};
use crate::position::Position;
use crate::price_provider::PriceProvider;
use crate::store::{CacheStatus, PositionStore};

#[derive(Clone)]
pub struct AppState {
    pub store: PositionStore,
    pub provider: Arc<dyn PriceProvider>,
    pub positions_path: PathBuf,
}

/// Response errors: an unknown symbol is 404, everything else is a 500
/// carrying the failure context and message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Asset {0} not found")]
    NotFound(String),
    #[error("{context}: {message}")]
    Internal {
        context: &'static str,
        message: String,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(symbol) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("Asset {symbol} not found") })),
            )
                .into_response(),
            ApiError::Internal { context, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": context, "message": message })),
            )
                .into_response(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn ensure_cache(state: &AppState, context: &'static str) -> ApiResult<()> {
    if state.store.is_empty().await {
        state.store.reload().await.map_err(|e| {
            error!(error = %e, "position reload failed");
            ApiError::Internal {
                context,
                message: e.to_string(),
            }
        })?;
    }
    Ok(())
}

async fn get_assets(State(state): State<AppState>) -> ApiResult<Json<HashMap<String, Position>>> {
    ensure_cache(&state, "Failed to load asset positions").await?;
    let positions = state.store.positions().await;
    info!("Serving {} assets from cache", positions.len());
    Ok(Json(positions))
}

async fn get_asset(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> ApiResult<Json<HashMap<String, Position>>> {
    let canonical = symbol.to_uppercase();
    if let Some(position) = state.store.get(&canonical).await {
        return Ok(Json(HashMap::from([(canonical, position)])));
    }

    // Not cached: try the file directly, like a record that was filtered
    // out of the active set.
    match state.store.load_uncached(&canonical).await {
        Ok(Some(position)) => Ok(Json(HashMap::from([(canonical, position)]))),
        Ok(None) => Err(ApiError::NotFound(symbol)),
        Err(e) => Err(ApiError::Internal {
            context: "Failed to load asset position",
            message: e.to_string(),
        }),
    }
}

async fn get_portfolio(State(state): State<AppState>) -> ApiResult<Json<PortfolioView>> {
    ensure_cache(&state, "Failed to load asset positions").await?;
    let positions = state.store.positions().await;
    let view = enrich_portfolio(&positions, state.provider.as_ref()).await;
    Ok(Json(view))
}

async fn get_cache_status(State(state): State<AppState>) -> Json<CacheStatus> {
    Json(state.store.cache_status().await)
}

async fn get_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "assetPositionsPath": state.positions_path,
    }))
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET]);

    Router::new()
        .route("/api/health", get(get_health))
        .route("/api/assets", get(get_assets))
        .route("/api/assets/{symbol}", get(get_asset))
        .route("/api/portfolio", get(get_portfolio))
        .route("/api/cache-status", get(get_cache_status))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn serve(
    config: &AppConfig,
    store: PositionStore,
    provider: Arc<dyn PriceProvider>,
) -> Result<()> {
    let state = AppState {
        store,
        provider,
        positions_path: config.positions_path.clone(),
    };
    let app = router(state, &config.server.allowed_origins);

    let addr = format!("127.0.0.1:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Asset positions API server running on http://{addr}");
    info!(
        "Reading asset positions from: {}",
        config.positions_path.display()
    );

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
