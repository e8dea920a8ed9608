//! Secondary indexes with explicit ordering.
//!
//! Each indexed attribute owns a hash `<type>:<attr>_index` mapping a raw
//! value to the key of a sorted set holding every id with that value. The
//! score of an id is its rank: it decides the id's position inside the set,
//! which is what gives one-to-many associations their order.
//!
//! Positional inserts avoid renumbering the set. A new id takes the free
//! space just below its successor's rank; only when that gap is exhausted
//! is the tail shifted up by one in a single atomic store call.
//!
//! Invariant: a value has an entry in the index hash iff its id set is
//! non-empty.

use std::sync::Arc;

use crate::error::ModelResult;
use crate::keys::TypeKeys;
use crate::model::EntityId;
use crate::storage::KeyValueStore;

/// Rank given to the first id of an empty set.
pub const BASE_RANK: f64 = 1000.0;

/// Smallest gap that is still split instead of shifting the tail.
pub const RANK_GAP: f64 = 0.1;

/// Maintains value -> ordered id set mappings.
#[derive(Clone)]
pub struct IndexManager {
    store: Arc<dyn KeyValueStore>,
}

/// Store rank for a zero-based position, `None` when it cannot address
/// any member. Positions past `i64::MAX` would wrap into ranks counted
/// from the tail.
pub(crate) fn store_rank(position: usize) -> Option<i64> {
    i64::try_from(position).ok()
}

impl IndexManager {
    /// Index manager writing through `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Key of the id set currently holding `raw_value`, if any.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn lookup(&self, keys: &TypeKeys, attr: &str, raw_value: &str) -> ModelResult<Option<String>> {
        Ok(self.store.hget(&keys.index(attr), raw_value)?)
    }

    /// Insert `id` into the ordered set at `id_set_key`.
    ///
    /// With no position, or a position at or past the end, the id is
    /// appended. Otherwise it lands before the element currently at
    /// `position`. Returns the rank assigned.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn insert(&self, id_set_key: &str, id: EntityId, position: Option<usize>) -> ModelResult<f64> {
        let member = id.to_string();
        let size = self.store.zcard(id_set_key)?;

        let rank = match position {
            _ if size == 0 => BASE_RANK,
            Some(position) if position < size => {
                match self.rank_before(id_set_key, position)? {
                    Some(rank) => rank,
                    // The set shrank under us; fall back to an append.
                    None => self.append_rank(id_set_key)?,
                }
            }
            _ => self.append_rank(id_set_key)?,
        };

        self.store.zadd(id_set_key, &member, rank)?;
        Ok(rank)
    }

    fn append_rank(&self, id_set_key: &str) -> ModelResult<f64> {
        Ok(self
            .store
            .zscore_at(id_set_key, -1)?
            .map_or(BASE_RANK, |last| last + 1.0))
    }

    /// Rank for a new element placed before the one at `position`.
    ///
    /// The result is strictly between the neighbours' ranks. Ties would be
    /// broken by member string order and misplace the new id.
    fn rank_before(&self, id_set_key: &str, position: usize) -> ModelResult<Option<f64>> {
        let Some(pos) = store_rank(position) else {
            return Ok(None);
        };
        let Some(at) = self.store.zscore_at(id_set_key, pos)? else {
            return Ok(None);
        };
        let prev = if position == 0 {
            0.0
        } else {
            self.store.zscore_at(id_set_key, pos - 1)?.unwrap_or(0.0)
        };

        let candidate = at - RANK_GAP;
        if candidate > prev {
            return Ok(Some(candidate));
        }

        tracing::debug!(id_set = id_set_key, position, "rank gap exhausted, shifting tail");
        self.store.zincr_from_rank(id_set_key, position, 1.0)?;
        // The old rank of the element at `position` is now free and still
        // above `prev`.
        Ok(Some(at))
    }

    /// Drop `id` from the set of `raw_value`, deleting the set and its index
    /// entry once empty. Removing an absent id is a no-op.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn remove(&self, keys: &TypeKeys, attr: &str, raw_value: &str, id: EntityId) -> ModelResult<bool> {
        let index_key = keys.index(attr);
        let Some(id_set_key) = self.store.hget(&index_key, raw_value)? else {
            return Ok(false);
        };
        let removed = self.store.zrem(&id_set_key, &id.to_string())?;
        self.prune(&index_key, raw_value, &id_set_key)?;
        Ok(removed)
    }

    /// Drop whatever id sits at `rank` in the set of `raw_value`.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn remove_at_rank(&self, keys: &TypeKeys, attr: &str, raw_value: &str, rank: usize) -> ModelResult<bool> {
        let index_key = keys.index(attr);
        let Some(id_set_key) = self.store.hget(&index_key, raw_value)? else {
            return Ok(false);
        };
        let Some(rank) = store_rank(rank) else {
            return Ok(false);
        };
        let removed = self.store.zrem_range_by_rank(&id_set_key, rank, rank)? > 0;
        self.prune(&index_key, raw_value, &id_set_key)?;
        Ok(removed)
    }

    fn prune(&self, index_key: &str, raw_value: &str, id_set_key: &str) -> ModelResult<()> {
        if self.store.zcard(id_set_key)? > 0 {
            return Ok(());
        }
        self.store.hdel(index_key, raw_value)?;
        // Ids of other entities are written under their own locks; if one
        // landed meanwhile, put the mapping back instead of orphaning it.
        if self.store.zcard(id_set_key)? > 0 {
            self.store.hset(index_key, raw_value, id_set_key)?;
        } else {
            self.store.del(id_set_key)?;
        }
        Ok(())
    }

    /// Move `id` from the set of `old` to the set of `new`, placing it at
    /// `position` in the new set.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn reindex(
        &self,
        keys: &TypeKeys,
        attr: &str,
        id: EntityId,
        old: Option<&str>,
        new: Option<&str>,
        position: Option<usize>,
    ) -> ModelResult<()> {
        if let Some(old) = old {
            self.remove(keys, attr, old, id)?;
        }
        if let Some(new) = new {
            let index_key = keys.index(attr);
            let id_set_key = match self.store.hget(&index_key, new)? {
                Some(existing) => existing,
                None => {
                    let created = keys.id_set(attr, new);
                    self.store.hset(&index_key, new, &created)?;
                    created
                }
            };
            self.insert(&id_set_key, id, position)?;
        }
        Ok(())
    }
}
