//! SQL-backed nonce store.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use super::{NonceError, NonceStore};
use crate::clock::unix_now;
use crate::storage::Provider;

/// Nonces persisted in the `nonces` table. Survives restarts, so a consumed
/// token stays consumed even across process lifetimes.
pub struct SqlNonceStore {
    provider: Arc<Provider>,
    stop: watch::Sender<bool>,
}

impl SqlNonceStore {
    /// Create the store and spawn its sweeper.
    #[must_use]
    pub fn spawn(provider: Arc<Provider>, sweep_interval: Duration) -> Arc<Self> {
        let (stop, mut stop_rx) = watch::channel(false);
        let store = Arc::new(Self { provider, stop });

        let sweeper = Arc::clone(&store.provider);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = sweeper.expire_nonces(unix_now()).await {
                            debug!("nonce sweep failed: {err}");
                        }
                    }
                    _ = stop_rx.changed() => return,
                }
            }
        });

        store
    }
}

#[async_trait]
impl NonceStore for SqlNonceStore {
    async fn put(&self, nonce: &str, ttl_seconds: i64) -> Result<(), NonceError> {
        if ttl_seconds <= 0 {
            return Err(NonceError::InvalidTtl);
        }
        self.provider
            .create_nonce(nonce, unix_now() + ttl_seconds)
            .await?;
        Ok(())
    }

    async fn consume(&self, nonce: &str) -> Result<(), NonceError> {
        // The DELETE either removed a live row, removed an expired leftover
        // (reported as such), or found nothing.
        match self.provider.consume_nonce(nonce).await? {
            Some(expiry) if unix_now() >= expiry => Err(NonceError::Expired { expiry }),
            Some(_) => Ok(()),
            None => Err(NonceError::Missing),
        }
    }

    async fn exists(&self, nonce: &str) -> bool {
        match self.provider.exists_nonce(nonce, unix_now()).await {
            Ok(present) => present,
            Err(err) => {
                debug!("nonce existence check failed: {err}");
                false
            }
        }
    }

    async fn expire(&self, now: i64) -> Result<(), NonceError> {
        self.provider.expire_nonces(now).await?;
        Ok(())
    }

    fn close(&self) {
        let _ = self.stop.send(true);
    }
}
