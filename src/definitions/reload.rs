//! Coalesced reload requests.
//!
//! Triggers (filesystem watcher, SIGHUP, callers) only signal that a reload
//! is wanted. A single task performs loads, and requests that arrive while
//! one is already pending collapse into it.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::definitions::loader::DefinitionLoader;
use crate::definitions::repository::DefinitionRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    FileChange,
    Signal,
    Manual,
}

impl fmt::Display for ReloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReloadReason::FileChange => "file change",
            ReloadReason::Signal => "signal",
            ReloadReason::Manual => "manual",
        })
    }
}

/// Handle used to request a reload.
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    tx: mpsc::Sender<ReloadReason>,
}

impl ReloadTrigger {
    pub fn channel() -> (Self, mpsc::Receiver<ReloadReason>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Ask for a reload. Returns false when one is already pending or the
    /// reload task has stopped.
    pub fn request(&self, reason: ReloadReason) -> bool {
        match self.tx.try_send(reason) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(reason = %reason, "Reload already pending");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Serve reload requests until shutdown.
pub async fn run_reloader(
    loader: Arc<DefinitionLoader>,
    repository: Arc<dyn DefinitionRepository>,
    mut requests: mpsc::Receiver<ReloadReason>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            reason = requests.recv() => {
                let Some(reason) = reason else { break };
                tracing::info!(reason = %reason, "Reloading definitions");
                if let Err(e) = loader.load(repository.as_ref()).await {
                    tracing::error!(error = %e, "Reload failed, keeping current routes");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Reloader received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
