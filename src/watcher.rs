use std::path::PathBuf;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::store::PositionStore;

/// Watches the positions directory and forwards change notifications to the
/// store, which does the coalescing and reloading.
pub struct PositionWatcher {
    positions_path: PathBuf,
    store: PositionStore,
}

impl PositionWatcher {
    pub fn new(positions_path: impl Into<PathBuf>, store: PositionStore) -> Self {
        PositionWatcher {
            positions_path: positions_path.into(),
            store,
        }
    }

    /// Runs until the event stream closes. A missing directory is not an
    /// error: the watcher just has nothing to do.
    pub async fn run(&self) -> Result<()> {
        if !self.positions_path.exists() {
            warn!(
                "Asset positions folder does not exist, not watching: {}",
                self.positions_path.display()
            );
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(100);
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.blocking_send(res);
            },
            Config::default(),
        )
        .context("Failed to initialize file watcher")?;
        watcher
            .watch(&self.positions_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", self.positions_path.display()))?;
        info!(
            "File watcher setup for {}",
            self.positions_path.display()
        );

        while let Some(res) = rx.recv().await {
            match res {
                Ok(event) => self.handle_event(event),
                Err(e) => error!("Watch error: {e:?}"),
            }
        }

        Ok(())
    }

    fn handle_event(&self, event: Event) {
        if !matches!(
            event.kind,
            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
        ) {
            return;
        }

        for path in event.paths {
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            debug!("File change detected: {}", path.display());
            self.store.notify_change();
        }
    }
}
