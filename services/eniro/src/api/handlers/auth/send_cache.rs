//! Per-address email send throttle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Remembers when an address was last mailed; repeat requests inside the
/// configured interval are refused. Entries are dropped by a task spawned
/// per send once the interval has elapsed.
pub struct EmailSentCache {
    interval: Duration,
    entries: Arc<Mutex<HashMap<String, Instant>>>,
}

impl EmailSentCache {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a send for `email` unless one happened within the interval.
    /// Returns `false` when throttled.
    pub async fn try_acquire(&self, email: &str) -> bool {
        let mut entries = self.entries.lock().await;
        if let Some(last_sent) = entries.get(email) {
            if last_sent.elapsed() < self.interval {
                debug!(email, "email send throttled");
                return false;
            }
        }
        entries.insert(email.to_string(), Instant::now());
        drop(entries);

        // Drop the entry once the interval has passed so the map does not
        // accumulate one key per address ever seen.
        let entries = Arc::clone(&self.entries);
        let interval = self.interval;
        let email = email.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let mut entries = entries.lock().await;
            if entries
                .get(&email)
                .is_some_and(|last_sent| last_sent.elapsed() >= interval)
            {
                entries.remove(&email);
            }
        });

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_send_within_interval_is_throttled() {
        let cache = EmailSentCache::new(Duration::from_secs(60));
        assert!(cache.try_acquire("alice@example.com").await);
        assert!(!cache.try_acquire("alice@example.com").await);
        // Other addresses are unaffected.
        assert!(cache.try_acquire("bob@example.com").await);
    }

    #[tokio::test]
    async fn entry_expires_after_the_interval() {
        let cache = EmailSentCache::new(Duration::from_millis(20));
        assert!(cache.try_acquire("alice@example.com").await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.try_acquire("alice@example.com").await);
    }
}
