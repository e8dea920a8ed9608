//! Ordered one-to-many associations.
//!
//! Membership is the item's foreign key attribute pointing at the owner, so
//! the owner's members are exactly the id set of that foreign key value and
//! their order is the rank order of that set. Adding a member makes it share
//! the owner's lock token and route its version bumps to the owner, which is
//! what lets an owner's version observe mutations of its members.

use crate::cursor::{CursorIter, ResultCursor};
use crate::engine::SearchOptions;
use crate::error::{ModelResult, SchemaError};
use crate::model::{EntityId, Model, SetOptions};
use crate::schema::Association;
use crate::value::Value;

/// One owner's view of a one-to-many association.
#[derive(Debug, Clone)]
pub struct Collection {
    owner: Model,
    association: Association,
    foreign_key: String,
    scope: Vec<(String, Value)>,
    buffered: bool,
}

impl Collection {
    pub(crate) fn new(owner: Model, association: Association, foreign_key: String, buffered: bool) -> Self {
        Self {
            owner,
            association,
            foreign_key,
            scope: Vec::new(),
            buffered,
        }
    }

    /// Association name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.association.name
    }

    /// Type of the members.
    #[must_use]
    pub fn item_type(&self) -> &str {
        &self.association.item_type
    }

    /// Attribute of the item type pointing back at the owner.
    #[must_use]
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// Entity owning the members.
    #[must_use]
    pub fn owner(&self) -> &Model {
        &self.owner
    }

    /// Narrow reads to members also matching `predicates`.
    ///
    /// Scoped order follows the summed ranks of the intersected sets, not
    /// the association order alone.
    #[must_use]
    pub fn with_scope(mut self, predicates: &[(&str, Value)]) -> Self {
        self.scope
            .extend(predicates.iter().map(|(name, value)| ((*name).to_string(), value.clone())));
        self
    }

    /// Choose paged or single-read iteration for later cursors.
    pub fn set_buffered(&mut self, buffered: bool) {
        self.buffered = buffered;
    }

    /// Whether cursors page lazily.
    #[must_use]
    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    /// Cursor over the current members.
    ///
    /// # Errors
    /// `Schema` for a bad scope, `Storage` on store failure.
    pub fn cursor(&self) -> ModelResult<ResultCursor> {
        let mut predicates: Vec<(&str, Value)> = Vec::with_capacity(self.scope.len() + 1);
        predicates.push((self.foreign_key.as_str(), Value::from(self.owner.id())));
        predicates.extend(self.scope.iter().map(|(name, value)| (name.as_str(), value.clone())));
        self.owner.engine().search(
            self.item_type(),
            &predicates,
            SearchOptions {
                buffered: Some(self.buffered),
                ..SearchOptions::default()
            },
        )
    }

    /// Append `item`, or move it to the end if already a member.
    ///
    /// # Errors
    /// `TypeMismatch` for an item of the wrong type, `LockUnavailable`,
    /// `Storage`.
    pub fn add(&self, item: &Model) -> ModelResult<()> {
        self.place(item, None)
    }

    /// Insert `item` before the member currently at `position`. Positions at
    /// or past the end append.
    ///
    /// # Errors
    /// Same as [`add`](Self::add).
    pub fn insert(&self, position: usize, item: &Model) -> ModelResult<()> {
        self.place(item, Some(position))
    }

    /// Reposition an existing member. Equivalent to [`insert`](Self::insert)
    /// for an item that is not yet a member.
    ///
    /// # Errors
    /// Same as [`add`](Self::add).
    pub fn move_to(&self, position: usize, item: &Model) -> ModelResult<()> {
        self.place(item, Some(position))
    }

    fn place(&self, item: &Model, position: Option<usize>) -> ModelResult<()> {
        self.check_item(item)?;
        let _guard = self.owner.lock()?;
        item.adopt_owner(&self.owner)?;
        item.set_with(
            &self.foreign_key,
            Some(Value::from(self.owner.id())),
            SetOptions {
                position,
                skip_lock: true,
                force_reindex: true,
            },
        )?;
        tracing::debug!(
            owner = %self.owner.id(),
            association = %self.association.name,
            item = %item.id(),
            ?position,
            "placed association member"
        );
        Ok(())
    }

    /// Remove `item` from the association. Its other attributes are kept.
    ///
    /// # Errors
    /// `TypeMismatch`, `LockUnavailable`, `Storage`.
    pub fn remove(&self, item: &Model) -> ModelResult<()> {
        self.check_item(item)?;
        let _guard = self.owner.lock()?;
        item.release_owner()?;
        // The item now has a token of its own, distinct from the owner's.
        item.set_with(&self.foreign_key, None, SetOptions::default())?;
        tracing::debug!(
            owner = %self.owner.id(),
            association = %self.association.name,
            item = %item.id(),
            "removed association member"
        );
        Ok(())
    }

    /// Remove the member at `index` from the ordered set only. The item's
    /// foreign key is left in place and is repaired on its next placement.
    ///
    /// On a scoped collection `index` addresses the scoped order, the same
    /// member [`get`](Self::get) returns for it.
    ///
    /// # Errors
    /// `Schema` for a bad scope, `LockUnavailable`, `Storage`.
    pub fn remove_at(&self, index: usize) -> ModelResult<bool> {
        let _guard = self.owner.lock()?;
        let engine = self.owner.engine();
        let item_keys = engine.schema(self.item_type())?.keys().clone();
        let owner_id = self.owner.id().to_string();
        if self.scope.is_empty() {
            return engine
                .index()
                .remove_at_rank(&item_keys, &self.foreign_key, &owner_id, index);
        }
        let Some(member) = self.cursor()?.get(index)? else {
            return Ok(false);
        };
        engine
            .index()
            .remove(&item_keys, &self.foreign_key, &owner_id, member.id())
    }

    /// Number of members.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn len(&self) -> ModelResult<usize> {
        self.cursor()?.len()
    }

    /// # Errors
    /// `Storage` on store failure.
    pub fn is_empty(&self) -> ModelResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Member at `index`.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn get(&self, index: usize) -> ModelResult<Option<Model>> {
        self.cursor()?.get(index)
    }

    /// Up to `length` members starting at `offset`.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn range(&self, offset: usize, length: usize) -> ModelResult<Vec<Model>> {
        self.cursor()?.range(offset, length)
    }

    /// Iterate members in order.
    ///
    /// # Errors
    /// `Schema` for a bad scope, `Storage` on store failure.
    pub fn iter(&self) -> ModelResult<CursorIter> {
        Ok(self.cursor()?.iter())
    }

    /// Member ids in order.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn ids(&self) -> ModelResult<Vec<EntityId>> {
        self.cursor()?.ids()
    }

    /// Delete every member entity.
    ///
    /// # Errors
    /// The first failed delete; earlier deletes stay applied.
    pub fn delete_all(&self) -> ModelResult<usize> {
        let engine = self.owner.engine();
        let ids = self.ids()?;
        for id in &ids {
            engine.delete(&engine.attach(self.item_type(), *id)?)?;
        }
        Ok(ids.len())
    }

    fn check_item(&self, item: &Model) -> ModelResult<()> {
        if item.type_name() == self.association.item_type {
            return Ok(());
        }
        Err(SchemaError::TypeMismatch {
            attribute: self.association.name.clone(),
            expected: self.association.item_type.clone(),
            actual: item.type_name().to_string(),
        }
        .into())
    }
}
