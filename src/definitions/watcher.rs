//! Definitions directory watcher for hot reload.
//!
//! Editors often save by truncating and then writing, which shows up as
//! several events. A reload is requested only once the directory has been
//! quiet for the debounce period, so a half-written file is never loaded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::definitions::reload::{ReloadReason, ReloadTrigger};

/// Watches a definitions directory and requests a reload on changes.
pub struct DefinitionWatcher {
    path: PathBuf,
    trigger: ReloadTrigger,
    debounce: Duration,
}

impl DefinitionWatcher {
    pub fn new(path: &Path, trigger: ReloadTrigger, debounce: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            trigger,
            debounce,
        }
    }

    /// Start watching. The returned watcher must be kept alive; dropping it
    /// also stops the debounce task.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (tx, rx) = mpsc::channel::<Vec<PathBuf>>(100);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                        // A full channel already guarantees a pending reload.
                        let _ = tx.try_send(event.paths);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Definition watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::Recursive)?;
        tokio::spawn(debounce_changes(rx, self.trigger, self.debounce));

        tracing::info!(
            path = %self.path.display(),
            debounce = ?self.debounce,
            "Definition watcher started"
        );
        Ok(watcher)
    }
}

/// Request one reload per burst of change events.
async fn debounce_changes(
    mut rx: mpsc::Receiver<Vec<PathBuf>>,
    trigger: ReloadTrigger,
    debounce: Duration,
) {
    while let Some(paths) = rx.recv().await {
        tracing::debug!(paths = ?paths, "Definition change detected");

        loop {
            tokio::select! {
                more = rx.recv() => match more {
                    Some(paths) => tracing::debug!(paths = ?paths, "Definition change detected"),
                    None => return,
                },
                _ = tokio::time::sleep(debounce) => break,
            }
        }

        trigger.request(ReloadReason::FileChange);
    }
}
