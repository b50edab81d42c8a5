//! Key-value store subsystem.
//!
//! # Data Flow
//! ```text
//! storage DSN (memory://...)
//!     → connect() picks a backend by scheme
//!     → Arc<dyn KeyValueStore> handed to the OAuth-aware transports
//! ```
//!
//! # Design Decisions
//! - One capability trait; callers never branch on the backend
//! - Entries carry an optional time-to-live; expired entries read as absent
//! - Remote backends are external collaborators and plug in behind the trait

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

pub use memory::InMemoryStore;

/// Errors raised by key-value store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store DSN: {0}")]
    InvalidDsn(String),

    #[error("unsupported store scheme: {0}")]
    UnsupportedScheme(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Get/set/expire access to tokens and counters.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; expired or missing keys yield `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous one. `None` never expires.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Remove a key; absent keys are not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Drop expired entries eagerly. Backends that expire keys on their own return 0.
    fn purge_expired(&self) -> usize {
        0
    }
}

/// Open the store selected by the DSN scheme.
pub fn connect(dsn: &str) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    let url = Url::parse(dsn).map_err(|e| StoreError::InvalidDsn(e.to_string()))?;

    match url.scheme() {
        "memory" => {
            tracing::debug!(dsn = %dsn, "Using in-memory key-value store");
            Ok(Arc::new(InMemoryStore::new()))
        }
        other => Err(StoreError::UnsupportedScheme(other.to_string())),
    }
}

/// Purge expired entries on a fixed period until shutdown.
pub async fn run_sweeper(
    store: Arc<dyn KeyValueStore>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired keys");
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Store sweeper received shutdown signal");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_selects_backend_by_scheme() {
        assert!(connect("memory://localhost").is_ok());
        assert!(matches!(
            connect("redis://localhost:6379"),
            Err(StoreError::UnsupportedScheme(s)) if s == "redis"
        ));
        assert!(matches!(connect("no scheme"), Err(StoreError::InvalidDsn(_))));
    }

    #[tokio::test]
    async fn sweeper_purges_until_shutdown() {
        let memory = InMemoryStore::new();
        memory.set("gone", "v".into(), Some(Duration::from_millis(5))).await.unwrap();
        memory.set("kept", "v".into(), None).await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(run_sweeper(
            Arc::new(memory.clone()),
            Duration::from_millis(10),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(()).unwrap();
        task.await.unwrap();

        assert_eq!(memory.len(), 1);
    }
}
