//! Single-use nonce stores.
//!
//! A nonce store is a TTL-bounded set of opaque strings. Presence means
//! "still valid"; [`NonceStore::consume`] removes at most once, and that
//! removal is the linearization point of every one-shot flow in the
//! service. Two backends exist, selected by configuration: an in-process
//! map and a SQLite-backed table. Both run a background sweeper that prunes
//! expired entries.

mod memory;
mod sql;

pub use memory::MemoryStore;
pub use sql::SqlNonceStore;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{RngCore, rngs::OsRng};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::storage::Provider;

/// Number of random bytes per nonce. 16 → 128-bit.
pub const NONCE_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum NonceError {
    #[error("nonce not found")]
    Missing,
    #[error("nonce expired at {expiry}")]
    Expired { expiry: i64 },
    #[error("ttl must be greater than zero")]
    InvalidTtl,
    #[error("nonce store error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to generate nonce")]
    Rng,
}

/// TTL set with at-most-once consumption.
///
/// `consume` is linearizable with respect to concurrent `consume`/`put` on
/// the same key: across any interleaving, exactly one caller observes
/// success for a given nonce.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Insert or refresh a nonce with the given TTL.
    async fn put(&self, nonce: &str, ttl_seconds: i64) -> Result<(), NonceError>;

    /// Remove the nonce, failing if it is absent or already expired.
    /// Expired entries are removed as a side effect.
    async fn consume(&self, nonce: &str) -> Result<(), NonceError>;

    /// Non-destructive lookup; expired entries report `false`.
    async fn exists(&self, nonce: &str) -> bool;

    /// Sweep entries whose expiry is at or before `now`.
    async fn expire(&self, now: i64) -> Result<(), NonceError>;

    /// Stop the background sweeper.
    fn close(&self);
}

/// Generate a fresh nonce token: 16 random bytes, base64url, no padding.
///
/// # Errors
///
/// Returns [`NonceError::Rng`] if the system RNG fails.
pub fn generate_nonce() -> Result<String, NonceError> {
    let mut bytes = [0u8; NONCE_SIZE];
    OsRng.try_fill_bytes(&mut bytes).map_err(|_| NonceError::Rng)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Supported nonce store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Sql,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "memory" => Ok(Self::Memory),
            "sql" => Ok(Self::Sql),
            other => Err(format!("unknown nonce store type {other:?}")),
        }
    }
}

/// Build a nonce store of the configured kind.
///
/// The sweep interval is twice the configured clock skew, so an entry is
/// never reaped while a token holding it could still verify.
#[must_use]
pub fn build_store(
    kind: StoreKind,
    expiry_skew_seconds: u64,
    provider: Arc<Provider>,
) -> Arc<dyn NonceStore> {
    let sweep_interval = Duration::from_secs((expiry_skew_seconds * 2).max(1));
    match kind {
        StoreKind::Memory => MemoryStore::spawn(sweep_interval),
        StoreKind::Sql => SqlNonceStore::spawn(provider, sweep_interval),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_nonces_are_unique_and_unpadded() -> Result<(), NonceError> {
        let first = generate_nonce()?;
        let second = generate_nonce()?;
        assert_ne!(first, second);
        assert!(!first.contains('='));
        // 16 bytes → 22 base64url characters without padding.
        assert_eq!(first.len(), 22);
        Ok(())
    }

    #[test]
    fn store_kind_parses() {
        assert_eq!("memory".parse::<StoreKind>(), Ok(StoreKind::Memory));
        assert_eq!("sql".parse::<StoreKind>(), Ok(StoreKind::Sql));
        assert!("redis".parse::<StoreKind>().is_err());
    }
}
