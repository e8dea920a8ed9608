//! Entity handles: typed attribute storage, versioning and locking.
//!
//! A [`Model`] is a lightweight handle (type + id) onto state that lives in
//! the store. Reads go straight to the store without locking; every write
//! runs the sequence
//!
//! ```text
//! lock -> read old -> compare -> write -> reindex -> bump version -> propagate -> unlock
//! ```
//!
//! so that observers of a version bump always see the matching index state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collection::Collection;
use crate::engine::ModelEngine;
use crate::error::{ModelError, ModelResult, SchemaError};
use crate::keys::TypeKeys;
use crate::lock::LockGuard;
use crate::schema::EntitySchema;
use crate::snapshot::{capture_score, Snapshot};
use crate::value::Value;

/// Process-unique, monotonically assigned entity identifier.
///
/// # Examples
///
/// ```
/// use rtmodel::EntityId;
///
/// let id: EntityId = "42".parse().unwrap();
/// assert_eq!(id.get(), 42);
/// assert_eq!(id.to_string(), "42");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric id.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::from(id.0)
    }
}

/// Options for [`Model::set_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Where to place the id in the new value's index set.
    pub position: Option<usize>,
    /// The caller already holds this entity's lock.
    pub skip_lock: bool,
    /// Re-place the id and bump the version even if the value is unchanged.
    pub force_reindex: bool,
}

impl SetOptions {
    /// Default options placing the id at `position` in its index set.
    #[must_use]
    pub fn at(position: usize) -> Self {
        Self {
            position: Some(position),
            ..Self::default()
        }
    }

    /// Skip the entity lock; the caller already holds it.
    #[must_use]
    pub fn unlocked(mut self) -> Self {
        self.skip_lock = true;
        self
    }
}

/// Handle onto one stored entity.
#[derive(Clone)]
pub struct Model {
    engine: ModelEngine,
    type_name: Arc<str>,
    keys: TypeKeys,
    id: EntityId,
    associated: Arc<Mutex<HashMap<String, Model>>>,
}

impl Model {
    pub(crate) fn new(engine: ModelEngine, type_name: &str, id: EntityId) -> Self {
        Self {
            engine,
            type_name: Arc::from(type_name),
            keys: TypeKeys::new(type_name),
            id,
            associated: Arc::default(),
        }
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Registered type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Engine this handle reads and writes through.
    #[must_use]
    pub fn engine(&self) -> &ModelEngine {
        &self.engine
    }

    pub(crate) fn keys(&self) -> &TypeKeys {
        &self.keys
    }

    /// Current schema of this entity's type.
    ///
    /// # Errors
    /// `UnknownType` if the type was never registered.
    pub fn schema(&self) -> ModelResult<Arc<EntitySchema>> {
        self.engine.schema(&self.type_name)
    }

    /// Read one scalar attribute. Absent fields read as `None`.
    ///
    /// # Errors
    /// `Schema` for undeclared attributes, `CorruptData` if the stored value
    /// does not parse as the declared kind.
    pub fn get(&self, name: &str) -> ModelResult<Option<Value>> {
        let schema = self.schema()?;
        let def = schema.scalar(name)?;
        let key = self.keys.attributes(self.id);
        match self.engine.store().hget(&key, name)? {
            Some(raw) => decode(&key, name, def.kind, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Every declared scalar attribute, in declaration order.
    ///
    /// # Errors
    /// `Storage` on store failure, `CorruptData` on unparsable values.
    pub fn attributes(&self) -> ModelResult<Vec<(String, Option<Value>)>> {
        let schema = self.schema()?;
        let key = self.keys.attributes(self.id);
        let stored = self.engine.store().hget_all(&key)?;
        schema
            .scalar_attributes()
            .map(|def| {
                let value = match stored.get(&def.name) {
                    Some(raw) => Some(decode(&key, &def.name, def.kind, raw)?),
                    None => None,
                };
                Ok((def.name.clone(), value))
            })
            .collect()
    }

    /// Write an attribute under the entity lock.
    ///
    /// # Errors
    /// See [`set_with`](Self::set_with).
    pub fn set(&self, name: &str, value: impl Into<Value>) -> ModelResult<()> {
        self.set_with(name, Some(value.into()), SetOptions::default())
    }

    /// Remove an attribute's value under the entity lock.
    ///
    /// # Errors
    /// See [`set_with`](Self::set_with).
    pub fn clear(&self, name: &str) -> ModelResult<()> {
        self.set_with(name, None, SetOptions::default())
    }

    /// Write or clear an attribute.
    ///
    /// Writing the value already stored is silently absorbed: no version
    /// bump, no index change, no propagation (unless `force_reindex`).
    ///
    /// # Errors
    /// `Schema` for undeclared attributes or mismatched kinds,
    /// `LockUnavailable` if the lock wait times out, `Storage` on store
    /// failure. A failure mid-sequence is not rolled back.
    pub fn set_with(&self, name: &str, value: Option<Value>, opts: SetOptions) -> ModelResult<()> {
        let schema = self.schema()?;
        let def = schema.scalar(name)?;
        let new_raw = value
            .map(|v| def.kind.coerce(name, v))
            .transpose()?
            .map(|v| v.to_raw());

        let _guard = self.engine.locks().scoped(&self.lock_token()?, opts.skip_lock)?;

        let store = self.engine.store();
        let key = self.keys.attributes(self.id);
        let old_raw = store.hget(&key, name)?;
        if old_raw == new_raw && !opts.force_reindex {
            tracing::trace!(type_name = %self.type_name, id = %self.id, attr = name, "unchanged write absorbed");
            return Ok(());
        }

        match &new_raw {
            Some(raw) => store.hset(&key, name, raw)?,
            None => {
                store.hdel(&key, name)?;
            }
        }

        if def.indexed {
            self.engine.index().reindex(
                &self.keys,
                name,
                self.id,
                old_raw.as_deref(),
                new_raw.as_deref(),
                opts.position,
            )?;
        }

        let version = self.bump_version()?;
        tracing::trace!(type_name = %self.type_name, id = %self.id, attr = name, version, "attribute written");
        Ok(())
    }

    /// Write several attributes under one lock acquisition and bump the
    /// version once if any of them changed.
    ///
    /// # Errors
    /// Same as [`set_with`](Self::set_with). Schema errors are reported
    /// before anything is written.
    pub fn update_attributes(&self, attrs: &[(&str, Option<Value>)]) -> ModelResult<()> {
        let schema = self.schema()?;
        let mut planned = Vec::with_capacity(attrs.len());
        for (name, value) in attrs {
            let def = schema.scalar(name)?;
            let raw = value
                .clone()
                .map(|v| def.kind.coerce(name, v))
                .transpose()?
                .map(|v| v.to_raw());
            planned.push((def, raw));
        }

        let _guard = self.lock()?;
        let store = self.engine.store();
        let key = self.keys.attributes(self.id);
        let mut changed = false;
        for (def, new_raw) in planned {
            let old_raw = store.hget(&key, &def.name)?;
            if old_raw == new_raw {
                continue;
            }
            match &new_raw {
                Some(raw) => store.hset(&key, &def.name, raw)?,
                None => {
                    store.hdel(&key, &def.name)?;
                }
            }
            if def.indexed {
                self.engine.index().reindex(
                    &self.keys,
                    &def.name,
                    self.id,
                    old_raw.as_deref(),
                    new_raw.as_deref(),
                    None,
                )?;
            }
            changed = true;
        }

        if changed {
            let version = self.bump_version()?;
            tracing::trace!(type_name = %self.type_name, id = %self.id, version, "attributes updated");
        }
        Ok(())
    }

    /// Number of committed mutations. Starts at 0.
    ///
    /// # Errors
    /// `Storage` on store failure, `CorruptData` if the counter is garbage.
    pub fn version(&self) -> ModelResult<u64> {
        let key = self.keys.version(self.id);
        match self.engine.store().get(&key)? {
            Some(raw) => raw
                .parse()
                .map_err(|_| ModelError::corrupt(key, format!("version '{raw}' is not a counter"))),
            None => Ok(0),
        }
    }

    /// Token naming this entity's lock, minted on first use.
    ///
    /// Association members report their owner's token.
    ///
    /// # Errors
    /// `Storage` on store failure.
    pub fn lock_token(&self) -> ModelResult<String> {
        let store = self.engine.store();
        let key = self.keys.lock(self.id);
        if let Some(token) = store.get(&key)? {
            return Ok(token);
        }
        // Set-if-absent so racing callers converge on a single token.
        store.set_nx(&key, &Uuid::new_v4().to_string())?;
        store
            .get(&key)?
            .ok_or_else(|| ModelError::internal(format!("lock token at '{key}' vanished")))
    }

    pub(crate) fn lock(&self) -> ModelResult<LockGuard> {
        self.engine.locks().acquire(&self.lock_token()?)
    }

    fn bump_version(&self) -> ModelResult<i64> {
        let store = self.engine.store();
        let version = store.incr(&self.keys.version(self.id))?;
        if let Some(owner_version) = store.get(&self.keys.dependent_version(self.id))? {
            if !owner_version.is_empty() {
                store.incr(&owner_version)?;
            }
        }
        Ok(version)
    }

    /// Share `owner`'s lock token and route version bumps to its counter.
    pub(crate) fn adopt_owner(&self, owner: &Model) -> ModelResult<()> {
        let store = self.engine.store();
        store.set(&self.keys.lock(self.id), &owner.lock_token()?, None)?;
        store.set(
            &self.keys.dependent_version(self.id),
            &owner.keys.version(owner.id),
            None,
        )?;
        Ok(())
    }

    /// Drop the linkage installed by [`adopt_owner`](Self::adopt_owner).
    pub(crate) fn release_owner(&self) -> ModelResult<()> {
        let store = self.engine.store();
        store.del(&self.keys.lock(self.id))?;
        store.del(&self.keys.dependent_version(self.id))?;
        Ok(())
    }

    /// A one-to-many association of this entity.
    ///
    /// # Errors
    /// `UnknownAssociation` if the type declares no such association.
    pub fn collection(&self, name: &str) -> ModelResult<Collection> {
        let schema = self.schema()?;
        let association = schema.many(name)?.clone();
        Ok(Collection::new(
            self.clone(),
            association,
            schema.foreign_key(),
            self.engine.config().buffered_search,
        ))
    }

    /// Resolve a one-to-one association.
    ///
    /// # Errors
    /// `UnknownAssociation`, or `Storage` on store failure.
    pub fn associated(&self, name: &str) -> ModelResult<Option<Model>> {
        let schema = self.schema()?;
        let association = schema.one(name)?;
        let Some(stored) = self.get(&association.id_attribute())? else {
            self.cache()?.remove(name);
            return Ok(None);
        };
        let id = stored
            .as_int()
            .and_then(|raw| u64::try_from(raw).ok())
            .map(EntityId::new)
            .ok_or_else(|| {
                ModelError::corrupt(self.keys.attributes(self.id), format!("'{name}' is not an id"))
            })?;

        if let Some(cached) = self.cache()?.get(name) {
            if cached.id == id {
                return Ok(Some(cached.clone()));
            }
        }
        let found = self.engine.find(&association.item_type, id)?;
        let mut cache = self.cache()?;
        match &found {
            Some(target) => {
                cache.insert(name.to_string(), target.clone());
            }
            None => {
                cache.remove(name);
            }
        }
        Ok(found)
    }

    /// Point a one-to-one association at `target`, or clear it.
    ///
    /// # Errors
    /// `TypeMismatch` if `target` has the wrong type, plus the errors of
    /// [`set_with`](Self::set_with).
    pub fn set_associated(&self, name: &str, target: Option<&Model>) -> ModelResult<()> {
        let schema = self.schema()?;
        let association = schema.one(name)?;
        if let Some(target) = target {
            if *target.type_name != association.item_type {
                return Err(SchemaError::TypeMismatch {
                    attribute: name.to_string(),
                    expected: association.item_type.clone(),
                    actual: target.type_name.to_string(),
                }
                .into());
            }
        }
        self.set_with(
            &association.id_attribute(),
            target.map(|t| Value::from(t.id)),
            SetOptions::default(),
        )?;

        let mut cache = self.cache()?;
        match target {
            Some(target) => {
                cache.insert(name.to_string(), target.clone());
            }
            None => {
                cache.remove(name);
            }
        }
        Ok(())
    }

    fn cache(&self) -> ModelResult<std::sync::MutexGuard<'_, HashMap<String, Model>>> {
        self.associated
            .lock()
            .map_err(|_| ModelError::internal("association cache lock poisoned"))
    }

    /// Store key of an embedded collection attribute.
    ///
    /// # Errors
    /// `UnknownAttribute` or `NotEmbedded`.
    pub fn embedded_key(&self, name: &str) -> ModelResult<String> {
        let schema = self.schema()?;
        let def = schema
            .attribute(name)
            .ok_or_else(|| SchemaError::UnknownAttribute {
                type_name: self.type_name.to_string(),
                attribute: name.to_string(),
            })?;
        if def.kind.is_scalar() {
            return Err(SchemaError::NotEmbedded {
                attribute: name.to_string(),
            }
            .into());
        }
        Ok(self.keys.embedded(self.id, name))
    }

    /// Capture id, version, attributes and association contents under the
    /// entity lock.
    ///
    /// Only the top level is locked; members are read lock-free and may be
    /// slightly newer or older than the owner's state.
    ///
    /// # Errors
    /// `LockUnavailable`, `Storage`, or `CorruptData`.
    pub fn snapshot(&self) -> ModelResult<Snapshot> {
        let _guard = self.lock()?;
        self.capture(true)
    }

    fn capture(&self, include_version: bool) -> ModelResult<Snapshot> {
        let schema = self.schema()?;
        let version = if include_version {
            Some(self.version()?)
        } else {
            None
        };
        let attributes: BTreeMap<String, Option<Value>> = self.attributes()?.into_iter().collect();

        let mut collections = BTreeMap::new();
        for association in schema.has_many() {
            let items = self
                .collection(&association.name)?
                .iter()?
                .map(|item| item.and_then(|m| m.capture(false)))
                .collect::<ModelResult<Vec<_>>>()?;
            collections.insert(association.name.clone(), items);
        }

        Ok(Snapshot {
            id: self.id,
            version,
            attributes,
            collections,
        })
    }

    /// Take a snapshot and append it to this entity's snapshot log.
    ///
    /// # Errors
    /// Same as [`snapshot`](Self::snapshot), plus `Codec`.
    pub fn save_snapshot(&self) -> ModelResult<Snapshot> {
        let snapshot = self.snapshot()?;
        let encoded = self.engine.codec().encode(&snapshot)?;
        self.engine
            .store()
            .zadd(&self.keys.snapshots(self.id), &encoded, capture_score(Utc::now()))?;
        Ok(snapshot)
    }

    /// Load a stored snapshot: the earliest taken at or after `at`, or the
    /// latest when `at` is `None`.
    ///
    /// # Errors
    /// `Storage` or `Codec`.
    pub fn load_snapshot(&self, at: Option<DateTime<Utc>>) -> ModelResult<Option<Snapshot>> {
        let store = self.engine.store();
        let key = self.keys.snapshots(self.id);
        let found = match at {
            Some(at) => store.zrange_by_score(&key, capture_score(at), f64::INFINITY, Some((0, 1)))?,
            None => store.zrange(&key, -1, -1)?,
        };
        found
            .first()
            .map(|encoded| self.engine.codec().decode(encoded))
            .transpose()
    }

    /// Delete this entity, cascading into its one-to-many associations.
    ///
    /// # Errors
    /// See [`ModelEngine::delete`].
    pub fn delete(&self) -> ModelResult<()> {
        self.engine.delete(self)
    }
}

fn decode(key: &str, name: &str, kind: crate::value::AttrKind, raw: &str) -> ModelResult<Value> {
    kind.decode(raw).ok_or_else(|| {
        ModelError::corrupt(key, format!("attribute '{name}' value '{raw}' is not a valid {kind}"))
    })
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("type_name", &self.type_name)
            .field("id", &self.id)
            .finish()
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.type_name == other.type_name
    }
}

impl Eq for Model {}
