//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Tunables for a [`ModelEngine`](crate::ModelEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// How long a mutation waits for an entity lock. `None` blocks forever.
    pub lock_timeout: Option<Duration>,
    /// Lifetime of a scratch key holding a multi-index intersection.
    pub temp_key_ttl: Duration,
    /// First page size of a buffered cursor.
    pub min_buffer_size: usize,
    /// Page size cap of a buffered cursor.
    pub max_buffer_size: usize,
    /// Whether search results and collections page lazily by default.
    pub buffered_search: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Some(Duration::from_secs(30)),
            temp_key_ttl: Duration::from_secs(60),
            min_buffer_size: 1,
            max_buffer_size: 1024,
            buffered_search: true,
        }
    }
}

impl ModelConfig {
    /// Set the lock wait bound. `None` waits forever.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the scratch key lifetime.
    #[must_use]
    pub fn with_temp_key_ttl(mut self, ttl: Duration) -> Self {
        self.temp_key_ttl = ttl;
        self
    }

    /// Set the first and largest cursor page sizes.
    #[must_use]
    pub fn with_buffer_sizes(mut self, min: usize, max: usize) -> Self {
        self.min_buffer_size = min;
        self.max_buffer_size = max;
        self
    }

    /// Set whether cursors page lazily by default.
    #[must_use]
    pub fn with_buffered_search(mut self, buffered: bool) -> Self {
        self.buffered_search = buffered;
        self
    }

    /// Reject settings that would stall a cursor or expire results before
    /// they can be read.
    ///
    /// # Errors
    /// `ModelError::InvalidConfig` when the buffer sizes or the scratch key
    /// lifetime are unusable.
    pub fn validate(&self) -> ModelResult<()> {
        if self.temp_key_ttl.is_zero() {
            return Err(ModelError::InvalidConfig {
                message: "temp_key_ttl must be non-zero".to_string(),
            });
        }
        if self.min_buffer_size == 0 {
            return Err(ModelError::InvalidConfig {
                message: "min_buffer_size must be at least 1".to_string(),
            });
        }
        if self.max_buffer_size < self.min_buffer_size {
            return Err(ModelError::InvalidConfig {
                message: format!(
                    "max_buffer_size ({}) is below min_buffer_size ({})",
                    self.max_buffer_size, self.min_buffer_size
                ),
            });
        }
        Ok(())
    }
}
