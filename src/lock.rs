//! Store-resident mutual exclusion around mutation sequences.
//!
//! Every compound mutation of an entity runs while holding the lock named by
//! the entity's lock token. Association members adopt their owner's token,
//! so mutating a member serializes against the owner.
//!
//! # Guarantees
//! - The lock is released when the [`LockGuard`] is dropped, on every exit
//!   path including `?` early returns and panics.
//! - Locks are not re-entrant: a caller already holding a token must pass
//!   `skip = true` to [`LockCoordinator::scoped`] for nested work on the same
//!   token.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ModelError, ModelResult};
use crate::storage::KeyValueStore;

fn lock_name(token: &str) -> String {
    format!("lock:{token}")
}

/// Acquires and releases named store locks.
#[derive(Clone)]
pub struct LockCoordinator {
    store: Arc<dyn KeyValueStore>,
    timeout: Option<Duration>,
}

impl LockCoordinator {
    /// Create a coordinator waiting at most `timeout` per acquisition.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, timeout: Option<Duration>) -> Self {
        Self { store, timeout }
    }

    /// Block until the lock for `token` is held.
    ///
    /// # Errors
    /// `LockUnavailable` when the configured timeout expires, `Storage` when
    /// the store fails.
    pub fn acquire(&self, token: &str) -> ModelResult<LockGuard> {
        let started = Instant::now();
        let name = lock_name(token);
        if !self.store.lock(&name, self.timeout)? {
            let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(token, waited_ms, "entity lock wait timed out");
            return Err(ModelError::LockUnavailable {
                token: token.to_string(),
                waited_ms,
            });
        }
        Ok(LockGuard {
            store: Arc::clone(&self.store),
            name,
            released: false,
        })
    }

    /// Acquire unless an enclosing operation already holds the token.
    ///
    /// # Errors
    /// Same as [`acquire`](Self::acquire).
    pub fn scoped(&self, token: &str, skip: bool) -> ModelResult<Option<LockGuard>> {
        if skip {
            return Ok(None);
        }
        self.acquire(token).map(Some)
    }
}

/// A held store lock, released on drop.
pub struct LockGuard {
    store: Arc<dyn KeyValueStore>,
    name: String,
    released: bool,
}

impl LockGuard {
    /// Release now and surface any store error.
    ///
    /// # Errors
    /// `Storage` if the store rejects the release.
    pub fn release(mut self) -> ModelResult<()> {
        self.released = true;
        self.store.unlock(&self.name)?;
        Ok(())
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.store.unlock(&self.name) {
            tracing::warn!(lock = %self.name, error = %err, "failed to release entity lock");
        }
    }
}
