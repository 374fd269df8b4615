use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::position::Position;

/// Quiet period after the last change notification before a reload runs.
/// Bots rewrite several files per logical update; bursts inside this window
/// coalesce into a single reload.
const RELOAD_DEBOUNCE: Duration = Duration::from_secs(1);

/// Snapshot of the cache, as served by the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub cached_assets: Vec<String>,
    pub last_modified: HashMap<String, i64>,
    pub cache_size: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Snapshot {
    positions: HashMap<String, Position>,
    last_modified: HashMap<String, i64>,
}

struct StoreInner {
    positions_path: PathBuf,
    snapshot: RwLock<Snapshot>,
    change_epoch: AtomicU64,
    reloads: AtomicU64,
}

/// In-memory cache of the per-asset position files, keyed by upper-case
/// symbol. Cheap to clone; clones share the cache.
///
/// Only records with at least one transaction are admitted. Reloads build
/// the complete new snapshot before swapping it in, so readers observe the
/// old cache or the new one, never an intermediate state. Overlapping
/// [`reload`](PositionStore::reload) calls are not de-duplicated; the last
/// one to complete wins.
#[derive(Clone)]
pub struct PositionStore {
    debounce: Duration,
    inner: Arc<StoreInner>,
}

impl PositionStore {
    pub fn new(positions_path: impl Into<PathBuf>) -> Self {
        PositionStore {
            debounce: RELOAD_DEBOUNCE,
            inner: Arc::new(StoreInner {
                positions_path: positions_path.into(),
                snapshot: RwLock::new(Snapshot::default()),
                change_epoch: AtomicU64::new(0),
                reloads: AtomicU64::new(0),
            }),
        }
    }

    /// Override the debounce quiet period.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Reads every `*.json` file in the positions directory and replaces the
    /// cache wholesale. A file that fails to parse is logged and skipped;
    /// only a directory-level failure is an error.
    pub async fn reload(&self) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(&self.inner.positions_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to read positions directory: {}",
                    self.inner.positions_path.display()
                )
            })?;

        let mut positions = HashMap::new();
        let mut last_modified = HashMap::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let symbol = stem.to_uppercase();

            match load_position_file(&path).await {
                Ok(position) if position.has_transactions() => {
                    if let Some(mtime) = modified_ms(&entry).await {
                        last_modified.insert(symbol.clone(), mtime);
                    }
                    positions.insert(symbol, position);
                }
                Ok(_) => debug!(symbol = %symbol, "skipping position with no transactions"),
                Err(e) => warn!(
                    file = %path.display(),
                    error = %e,
                    "failed to load position file, skipping"
                ),
            }
        }

        let count = positions.len();
        *self.inner.snapshot.write().await = Snapshot {
            positions,
            last_modified,
        };
        self.inner.reloads.fetch_add(1, Ordering::SeqCst);
        info!("Position cache updated with {count} assets");
        Ok(count)
    }

    /// Case-insensitive lookup from the cache.
    pub async fn get(&self, symbol: &str) -> Option<Position> {
        let snapshot = self.inner.snapshot.read().await;
        snapshot.positions.get(&symbol.to_uppercase()).cloned()
    }

    /// All cached positions, keyed by upper-case symbol.
    pub async fn positions(&self) -> HashMap<String, Position> {
        self.inner.snapshot.read().await.positions.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.snapshot.read().await.positions.is_empty()
    }

    /// Reads one position file directly, bypassing the cache and its
    /// admission filter. `Ok(None)` when the file does not exist.
    pub async fn load_uncached(&self, symbol: &str) -> Result<Option<Position>> {
        let symbol = symbol.to_uppercase();
        let path = self.inner.positions_path.join(format!("{symbol}.json"));
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let position = serde_json::from_str(&contents).with_context(|| {
                    format!("Failed to parse position file: {}", path.display())
                })?;
                Ok(Some(position))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read position file: {}", path.display())),
        }
    }

    pub async fn cache_status(&self) -> CacheStatus {
        let snapshot = self.inner.snapshot.read().await;
        let mut cached_assets: Vec<String> = snapshot.positions.keys().cloned().collect();
        cached_assets.sort();
        CacheStatus {
            cache_size: cached_assets.len(),
            cached_assets,
            last_modified: snapshot.last_modified.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Entry point for the change-detection transport. Each call re-arms the
    /// quiet-period timer; once no further notification has arrived for the
    /// whole debounce window, a single reload runs. A failed debounced
    /// reload is logged, never fatal.
    pub fn notify_change(&self) {
        let epoch = self.inner.change_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let store = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(store.debounce).await;
            if store.inner.change_epoch.load(Ordering::SeqCst) != epoch {
                // Superseded by a later notification.
                return;
            }
            if let Err(e) = store.reload().await {
                warn!(error = %e, "debounced reload failed");
            }
        });
    }
}

async fn load_position_file(path: &Path) -> Result<Position> {
    let contents = tokio::fs::read_to_string(path).await?;
    let position = serde_json::from_str(&contents)?;
    Ok(position)
}

async fn modified_ms(entry: &tokio::fs::DirEntry) -> Option<i64> {
    let modified = entry.metadata().await.ok()?.modified().ok()?;
    let elapsed = modified.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(elapsed.as_millis()).ok()
}
