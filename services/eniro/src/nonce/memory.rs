//! In-memory nonce store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::debug;

use super::{NonceError, NonceStore};
use crate::clock::unix_now;

/// Nonces in a map protected by a reader/writer lock; value is the absolute
/// expiry timestamp. Expiration is handled by a background sweeper task.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, i64>>,
    stop: watch::Sender<bool>,
}

impl MemoryStore {
    /// Create the store and spawn its sweeper.
    #[must_use]
    pub fn spawn(sweep_interval: Duration) -> Arc<Self> {
        let (stop, stop_rx) = watch::channel(false);
        let store = Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            stop,
        });

        let sweeper = Arc::clone(&store);
        tokio::spawn(async move {
            sweeper.sweep_loop(sweep_interval, stop_rx).await;
        });

        store
    }

    async fn sweep_loop(self: Arc<Self>, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.expire(unix_now()).await {
                        debug!("nonce sweep failed: {err}");
                    }
                }
                _ = stop_rx.changed() => return,
            }
        }
    }
}

#[async_trait]
impl NonceStore for MemoryStore {
    async fn put(&self, nonce: &str, ttl_seconds: i64) -> Result<(), NonceError> {
        if ttl_seconds <= 0 {
            return Err(NonceError::InvalidTtl);
        }
        let mut entries = self.entries.write().await;
        entries.insert(nonce.to_string(), unix_now() + ttl_seconds);
        Ok(())
    }

    async fn consume(&self, nonce: &str) -> Result<(), NonceError> {
        let mut entries = self.entries.write().await;
        let expiry = entries.remove(nonce).ok_or(NonceError::Missing)?;
        if unix_now() >= expiry {
            return Err(NonceError::Expired { expiry });
        }
        Ok(())
    }

    async fn exists(&self, nonce: &str) -> bool {
        let entries = self.entries.read().await;
        entries.get(nonce).is_some_and(|expiry| unix_now() < *expiry)
    }

    async fn expire(&self, now: i64) -> Result<(), NonceError> {
        let mut entries = self.entries.write().await;
        entries.retain(|_, expiry| *expiry > now);
        Ok(())
    }

    fn close(&self) {
        let _ = self.stop.send(true);
    }
}
