//! Pool of scratch keys for multi-index search results.
//!
//! Every name handed out is recorded in the `temp_keys_pool` sorted set,
//! scored by the time (unix milliseconds) after which it may be reused.
//! Acquiring first tries to recycle an expired name and only mints a fresh
//! `search_results:<unix seconds>:<uuid>` name when none is available, so
//! the number of scratch keys stays bounded by the search rate times the
//! TTL.
//!
//! Recycling is best effort: two callers racing on the same expired name may
//! both receive it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::ModelResult;
use crate::keys::{SEARCH_RESULTS_PREFIX, TEMP_KEYS_POOL};
use crate::storage::KeyValueStore;

/// Pool of reusable, expiring scratch keys for search intersections.
#[derive(Clone)]
pub struct TempKeyPool {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl TempKeyPool {
    /// Pool whose names stay reserved for `ttl` after each hand-out.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Reservation lifetime of a handed-out name.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Hand out a scratch key reserved for the next `ttl`.
    ///
    /// # Errors
    /// `Storage` on store failure.
    #[allow(clippy::cast_precision_loss)]
    pub fn acquire(&self) -> ModelResult<String> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis() as f64;

        let expired = self
            .store
            .zrange_by_score(TEMP_KEYS_POOL, f64::NEG_INFINITY, now_ms, Some((0, 1)))?;
        let key = match expired.into_iter().next() {
            Some(recycled) => {
                tracing::debug!(key = %recycled, "recycling scratch key");
                recycled
            }
            None => {
                let minted = format!("{SEARCH_RESULTS_PREFIX}:{}:{}", now.timestamp(), Uuid::new_v4());
                tracing::debug!(key = %minted, "minted scratch key");
                minted
            }
        };

        let reusable_at = now_ms + self.ttl.as_millis() as f64;
        self.store.zadd(TEMP_KEYS_POOL, &key, reusable_at)?;
        Ok(key)
    }

    /// Number of names currently tracked by the pool.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn len(&self) -> ModelResult<usize> {
        Ok(self.store.zcard(TEMP_KEYS_POOL)?)
    }

    /// # Errors
    /// `Storage` on store failure.
    pub fn is_empty(&self) -> ModelResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::storage::InMemoryStore;

    #[test]
    fn fresh_names_while_reserved() {
        let pool = TempKeyPool::new(Arc::new(InMemoryStore::new()), Duration::from_secs(60));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("search_results:"));
        assert_eq!(pool.len().unwrap(), 2);
    }

    #[test]
    fn expired_names_are_recycled() {
        let pool = TempKeyPool::new(Arc::new(InMemoryStore::new()), Duration::ZERO);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.len().unwrap(), 1);
    }

    #[test]
    fn recycling_renews_reservation() {
        let store = Arc::new(InMemoryStore::new());
        TempKeyPool::new(store.clone(), Duration::ZERO).acquire().unwrap();

        let pool = TempKeyPool::new(store, Duration::from_secs(60));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a, b, "the recycled name is reserved again");
    }
}
