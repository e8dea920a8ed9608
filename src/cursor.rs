//! Lazy views over ordered id sets.
//!
//! A [`ResultCursor`] names a sorted set of ids (an index set, or a scratch
//! intersection) and materializes entity handles on demand. Iteration is
//! either buffered, fetching pages that start at `min_buffer_size` and
//! double up to `max_buffer_size`, or unbuffered, reading the whole set in
//! one call.
//!
//! Cursors do not snapshot: concurrent inserts or removals between pages may
//! cause an id to be skipped or seen twice.

use std::collections::VecDeque;

use crate::engine::ModelEngine;
use crate::error::{ModelError, ModelResult};
use crate::index::store_rank;
use crate::model::{EntityId, Model};

/// Ordered, lazily materialized sequence of entities of one type.
#[derive(Clone)]
pub struct ResultCursor {
    engine: ModelEngine,
    item_type: String,
    key: Option<String>,
    buffered: bool,
    min_buffer_size: usize,
    max_buffer_size: usize,
}

impl ResultCursor {
    pub(crate) fn new(engine: ModelEngine, item_type: &str, key: Option<String>, buffered: bool) -> Self {
        let config = engine.config();
        let (min_buffer_size, max_buffer_size) = (config.min_buffer_size, config.max_buffer_size);
        Self {
            engine,
            item_type: item_type.to_string(),
            key,
            buffered,
            min_buffer_size,
            max_buffer_size,
        }
    }

    /// A cursor that yields nothing.
    pub(crate) fn empty(engine: ModelEngine, item_type: &str) -> Self {
        Self::new(engine, item_type, None, false)
    }

    /// Override the page sizes. `min` is raised to 1 and `max` to `min`.
    #[must_use]
    pub fn with_buffer_sizes(mut self, min: usize, max: usize) -> Self {
        self.min_buffer_size = min.max(1);
        self.max_buffer_size = max.max(self.min_buffer_size);
        self
    }

    /// Choose paged or single-read iteration.
    #[must_use]
    pub fn buffered(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }

    /// In-place form of [`buffered`](Self::buffered).
    pub fn set_buffered(&mut self, buffered: bool) {
        self.buffered = buffered;
    }

    /// Whether iteration pages lazily.
    #[must_use]
    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    /// Store key of the backing set, `None` for an empty result.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Type of the entities yielded.
    #[must_use]
    pub fn item_type(&self) -> &str {
        &self.item_type
    }

    /// Current cardinality of the backing set.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn len(&self) -> ModelResult<usize> {
        match &self.key {
            Some(key) => Ok(self.engine.store().zcard(key)?),
            None => Ok(0),
        }
    }

    /// # Errors
    /// `Storage` on store failure.
    pub fn is_empty(&self) -> ModelResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Entity at `offset` by ascending rank.
    ///
    /// # Errors
    /// `Storage`, or `CorruptData` for a non-id member.
    pub fn get(&self, offset: usize) -> ModelResult<Option<Model>> {
        Ok(self.range(offset, 1)?.into_iter().next())
    }

    /// Up to `length` entities starting at `offset`.
    ///
    /// # Errors
    /// `Storage`, or `CorruptData` for a non-id member.
    pub fn range(&self, offset: usize, length: usize) -> ModelResult<Vec<Model>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let ids = self.ids_in_range(offset, offset.saturating_add(length - 1))?;
        Ok(ids.into_iter().map(|id| self.model(id)).collect())
    }

    /// First entity, if any.
    ///
    /// # Errors
    /// Same as [`get`](Self::get).
    pub fn first(&self) -> ModelResult<Option<Model>> {
        self.get(0)
    }

    /// Every id in rank order, read in one call.
    ///
    /// # Errors
    /// `Storage`, or `CorruptData` for a non-id member.
    pub fn ids(&self) -> ModelResult<Vec<EntityId>> {
        let Some(key) = &self.key else {
            return Ok(Vec::new());
        };
        let members = self
            .engine
            .store()
            .zrange_by_score(key, f64::NEG_INFINITY, f64::INFINITY, None)?;
        parse_members(key, members)
    }

    /// Materialize every entity.
    ///
    /// # Errors
    /// The first error hit while iterating.
    pub fn to_vec(&self) -> ModelResult<Vec<Model>> {
        self.iter().collect()
    }

    /// Iterate in rank order, paging per the buffering mode.
    #[must_use]
    pub fn iter(&self) -> CursorIter {
        CursorIter {
            cursor: self.clone(),
            position: 0,
            page_size: self.min_buffer_size,
            pending: VecDeque::new(),
            started: false,
            done: false,
        }
    }

    /// Drop `item` from the backing set. Returns true if it was a member.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn remove(&self, item: &Model) -> ModelResult<bool> {
        match &self.key {
            Some(key) => Ok(self.engine.store().zrem(key, &item.id().to_string())?),
            None => Ok(false),
        }
    }

    /// Drop the member at `index`. Returns true if one was removed.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn remove_at(&self, index: usize) -> ModelResult<bool> {
        match (&self.key, store_rank(index)) {
            (Some(key), Some(rank)) => Ok(self.engine.store().zrem_range_by_rank(key, rank, rank)? > 0),
            _ => Ok(false),
        }
    }

    fn ids_in_range(&self, start: usize, stop: usize) -> ModelResult<Vec<EntityId>> {
        let (Some(key), Some(start)) = (&self.key, store_rank(start)) else {
            return Ok(Vec::new());
        };
        let stop = store_rank(stop).unwrap_or(i64::MAX);
        let members = self.engine.store().zrange(key, start, stop)?;
        parse_members(key, members)
    }

    fn model(&self, id: EntityId) -> Model {
        Model::new(self.engine.clone(), &self.item_type, id)
    }
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("item_type", &self.item_type)
            .field("key", &self.key)
            .field("buffered", &self.buffered)
            .finish_non_exhaustive()
    }
}

fn parse_members(key: &str, members: Vec<String>) -> ModelResult<Vec<EntityId>> {
    members
        .into_iter()
        .map(|member| {
            member
                .parse()
                .map_err(|_| ModelError::corrupt(key, format!("member '{member}' is not an id")))
        })
        .collect()
}

impl<'a> IntoIterator for &'a ResultCursor {
    type Item = ModelResult<Model>;
    type IntoIter = CursorIter;

    fn into_iter(self) -> CursorIter {
        self.iter()
    }
}

/// Iterator returned by [`ResultCursor::iter`].
///
/// A store error ends iteration after being yielded once.
pub struct CursorIter {
    cursor: ResultCursor,
    position: usize,
    page_size: usize,
    pending: VecDeque<EntityId>,
    started: bool,
    done: bool,
}

impl CursorIter {
    fn fill(&mut self) -> ModelResult<()> {
        if self.cursor.key.is_none() {
            self.done = true;
            return Ok(());
        }
        if !self.cursor.buffered {
            self.pending.extend(self.cursor.ids()?);
            self.done = true;
            return Ok(());
        }
        // Do-while: the first page is fetched before the size is known.
        if self.started && self.position >= self.cursor.len()? {
            self.done = true;
            return Ok(());
        }
        self.started = true;

        let page = self
            .cursor
            .ids_in_range(self.position, self.position.saturating_add(self.page_size - 1))?;
        tracing::trace!(
            item_type = %self.cursor.item_type,
            position = self.position,
            page_size = self.page_size,
            fetched = page.len(),
            "fetched cursor page"
        );
        self.position = self.position.saturating_add(self.page_size);
        self.page_size = (self.page_size * 2).min(self.cursor.max_buffer_size);
        self.pending.extend(page);
        Ok(())
    }
}

impl Iterator for CursorIter {
    type Item = ModelResult<Model>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.pending.pop_front() {
                return Some(Ok(self.cursor.model(id)));
            }
            if self.done {
                return None;
            }
            if let Err(err) = self.fill() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}
