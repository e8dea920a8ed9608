//! Abstract key-value store contract for rtmodel.
//!
//! The object layer never talks to a concrete database. It drives a store
//! exposing Redis-like primitives: counters, hashes, score-ordered sets,
//! plain sets, expiring scalars and a named blocking lock. Implementations
//! must make every single method atomic; no multi-key transactions are
//! assumed.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key holds a different kind of value.
    #[error("Wrong type at '{key}': expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
    },

    /// A counter operation hit a value that is not an integer.
    #[error("Value at '{key}' is not an integer")]
    NotAnInteger {
        key: String,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Capability contract of the backing ordered key-value store.
///
/// Sorted-set ranks follow Redis conventions: ascending by score, ties broken
/// by member, `start`/`stop` inclusive with negative values counting from
/// the end.
pub trait KeyValueStore: Send + Sync {
    // Counters

    /// Atomically increment the counter at `key` and return the new value.
    fn incr(&self, key: &str) -> Result<i64, StorageError>;

    // Hashes

    /// Get a hash field.
    fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StorageError>;

    /// Set a hash field.
    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a hash field. Returns true if it existed.
    fn hdel(&self, key: &str, field: &str) -> Result<bool, StorageError>;

    /// Set several hash fields at once.
    fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), StorageError>;

    /// Get every field of a hash.
    fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StorageError>;

    // Sorted sets

    /// Insert or re-score a member.
    fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StorageError>;

    /// Score of a member, if present.
    fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StorageError>;

    /// Members with scores for the inclusive rank range `[start, stop]`.
    fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, StorageError>;

    /// Members whose score lies in `[min, max]`, optionally paged by
    /// `(offset, count)`.
    fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(usize, usize)>,
    ) -> Result<Vec<String>, StorageError>;

    /// Number of members.
    fn zcard(&self, key: &str) -> Result<usize, StorageError>;

    /// Remove a member. Returns true if it was present.
    fn zrem(&self, key: &str, member: &str) -> Result<bool, StorageError>;

    /// Remove the inclusive rank range. Returns the number removed.
    fn zrem_range_by_rank(&self, key: &str, start: i64, stop: i64) -> Result<usize, StorageError>;

    /// Add `delta` to the score of every member from rank `start` to the end,
    /// as one atomic server-side step.
    fn zincr_from_rank(&self, key: &str, start: usize, delta: f64) -> Result<(), StorageError>;

    /// Store the intersection of `sources` into `dest`, summing scores.
    /// Returns the cardinality of the result.
    fn zinterstore(&self, dest: &str, sources: &[String]) -> Result<usize, StorageError>;

    // Plain sets

    /// Add a member. Returns true if it was newly added.
    fn sadd(&self, key: &str, member: &str) -> Result<bool, StorageError>;

    /// Remove a member. Returns true if it was present.
    fn srem(&self, key: &str, member: &str) -> Result<bool, StorageError>;

    /// Membership test.
    fn sismember(&self, key: &str, member: &str) -> Result<bool, StorageError>;

    /// Every member, in no particular order.
    fn smembers(&self, key: &str) -> Result<Vec<String>, StorageError>;

    // Scalars and key lifecycle

    /// Get a scalar value.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Set a scalar value, optionally expiring after `ttl`.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StorageError>;

    /// Set a scalar only if the key does not exist. Returns true if written.
    fn set_nx(&self, key: &str, value: &str) -> Result<bool, StorageError>;

    /// Delete a key of any kind. Returns true if it existed.
    fn del(&self, key: &str) -> Result<bool, StorageError>;

    /// Set a time-to-live on an existing key. Returns false if the key is
    /// missing.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StorageError>;

    // Named mutual exclusion

    /// Acquire the named lock, blocking until it is free. With a timeout,
    /// returns `Ok(false)` once the wait expires.
    fn lock(&self, name: &str, timeout: Option<Duration>) -> Result<bool, StorageError>;

    /// Release the named lock. Releasing a free lock is a no-op.
    fn unlock(&self, name: &str) -> Result<(), StorageError>;

    // Provided helpers

    /// Members for the inclusive rank range `[start, stop]`.
    fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StorageError> {
        Ok(self
            .zrange_with_scores(key, start, stop)?
            .into_iter()
            .map(|(member, _)| member)
            .collect())
    }

    /// Score of the member at `rank`, if any.
    fn zscore_at(&self, key: &str, rank: i64) -> Result<Option<f64>, StorageError> {
        Ok(self
            .zrange_with_scores(key, rank, rank)?
            .into_iter()
            .next()
            .map(|(_, score)| score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe
    fn _assert_store_object_safe(_: &dyn KeyValueStore) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::WrongType {
            key: "car:1:attributes".to_string(),
            expected: "hash",
        };
        assert!(err.to_string().contains("expected hash"));

        let err = StorageError::Backend("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
