//! Entry point tying schemas, store and services together.
//!
//! [`ModelEngine`] is cheap to clone; every clone shares the same store,
//! registry and configuration, and entity handles carry a clone of it.

use std::fmt;
use std::sync::Arc;

use crate::config::ModelConfig;
use crate::cursor::ResultCursor;
use crate::error::{ModelError, ModelResult};
use crate::index::IndexManager;
use crate::lock::LockCoordinator;
use crate::model::{EntityId, Model};
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::snapshot::{JsonSnapshotCodec, SnapshotCodec};
use crate::storage::KeyValueStore;
use crate::temp_keys::TempKeyPool;
use crate::value::Value;

/// Per-call search settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Page lazily. Defaults to the engine's `buffered_search`.
    pub buffered: Option<bool>,
    /// Store a multi-index intersection here instead of a pooled scratch
    /// key. Such keys are neither pooled nor expired.
    pub result_key: Option<String>,
}

/// Object layer over a [`KeyValueStore`].
#[derive(Clone)]
pub struct ModelEngine {
    store: Arc<dyn KeyValueStore>,
    schemas: Arc<SchemaRegistry>,
    config: Arc<ModelConfig>,
    locks: LockCoordinator,
    index: IndexManager,
    temp_keys: TempKeyPool,
    codec: Arc<dyn SnapshotCodec>,
}

impl ModelEngine {
    /// Engine with the default configuration and JSON snapshots.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::build(store, ModelConfig::default())
    }

    /// Engine with a custom configuration.
    ///
    /// # Errors
    /// `InvalidConfig` if `config` fails validation.
    pub fn with_config(store: Arc<dyn KeyValueStore>, config: ModelConfig) -> ModelResult<Self> {
        config.validate()?;
        Ok(Self::build(store, config))
    }

    fn build(store: Arc<dyn KeyValueStore>, config: ModelConfig) -> Self {
        Self {
            locks: LockCoordinator::new(Arc::clone(&store), config.lock_timeout),
            index: IndexManager::new(Arc::clone(&store)),
            temp_keys: TempKeyPool::new(Arc::clone(&store), config.temp_key_ttl),
            schemas: Arc::new(SchemaRegistry::new()),
            config: Arc::new(config),
            codec: Arc::new(JsonSnapshotCodec),
            store,
        }
    }

    /// Replace the snapshot codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn SnapshotCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub(crate) fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    pub(crate) fn index(&self) -> &IndexManager {
        &self.index
    }

    pub(crate) fn codec(&self) -> &dyn SnapshotCodec {
        self.codec.as_ref()
    }

    /// Register an entity type. See [`SchemaRegistry::register`].
    ///
    /// # Errors
    /// `DuplicateType` or `UnknownType`.
    pub fn register(&self, schema: EntitySchema) -> ModelResult<Arc<EntitySchema>> {
        self.schemas.register(schema)
    }

    /// # Errors
    /// `UnknownType` if the type was never registered.
    pub fn schema(&self, type_name: &str) -> ModelResult<Arc<EntitySchema>> {
        self.schemas.get(type_name)
    }

    /// # Errors
    /// `Internal` if the registry lock is poisoned.
    pub fn type_names(&self) -> ModelResult<Vec<String>> {
        self.schemas.type_names()
    }

    /// Create an entity with a fresh id and write `attrs` in order.
    ///
    /// Each attribute is a separate locked write, so the version after
    /// creation equals the number of attributes given.
    ///
    /// # Errors
    /// `Schema` errors are reported before an id is allocated.
    pub fn create(&self, type_name: &str, attrs: &[(&str, Value)]) -> ModelResult<Model> {
        let schema = self.schema(type_name)?;
        for (name, value) in attrs {
            schema.scalar(name)?.kind.coerce(name, value.clone())?;
        }

        let keys = schema.keys();
        let raw_id = self.store.incr(&keys.highest_id())?;
        let id = u64::try_from(raw_id)
            .map(EntityId::new)
            .map_err(|_| ModelError::corrupt(keys.highest_id(), format!("id counter is {raw_id}")))?;
        self.store.set(&keys.version(id), "0", None)?;
        self.store.sadd(&keys.ids(), &id.to_string())?;

        let model = Model::new(self.clone(), type_name, id);
        for (name, value) in attrs {
            model.set(name, value.clone())?;
        }
        tracing::debug!(type_name, %id, attributes = attrs.len(), "created entity");
        Ok(model)
    }

    /// Handle onto `id` without checking that it exists.
    ///
    /// # Errors
    /// `UnknownType` if the type was never registered.
    pub fn attach(&self, type_name: &str, id: EntityId) -> ModelResult<Model> {
        self.schema(type_name)?;
        Ok(Model::new(self.clone(), type_name, id))
    }

    /// # Errors
    /// `UnknownType` or `Storage`.
    pub fn exists(&self, type_name: &str, id: EntityId) -> ModelResult<bool> {
        let schema = self.schema(type_name)?;
        Ok(self.store.sismember(&schema.keys().ids(), &id.to_string())?)
    }

    /// Handle onto `id` if the entity exists.
    ///
    /// # Errors
    /// `UnknownType` or `Storage`.
    pub fn find(&self, type_name: &str, id: EntityId) -> ModelResult<Option<Model>> {
        if self.exists(type_name, id)? {
            Ok(Some(Model::new(self.clone(), type_name, id)))
        } else {
            Ok(None)
        }
    }

    /// First entity matching every predicate.
    ///
    /// # Errors
    /// Same as [`search`](Self::search).
    pub fn find_by(&self, type_name: &str, predicates: &[(&str, Value)]) -> ModelResult<Option<Model>> {
        self.search(type_name, predicates, SearchOptions::default())?
            .first()
    }

    /// Every entity matching every predicate.
    ///
    /// # Errors
    /// Same as [`search`](Self::search).
    pub fn find_all(&self, type_name: &str, predicates: &[(&str, Value)]) -> ModelResult<ResultCursor> {
        self.search(type_name, predicates, SearchOptions::default())
    }

    /// Entities whose indexed attributes equal every predicate value.
    ///
    /// Predicates on non-indexed or undeclared attributes are ignored. With
    /// no usable predicate, or when any predicate value has no index entry,
    /// the result is empty. A single predicate reads its index set directly;
    /// several are intersected into a scratch key, ordered by summed rank.
    ///
    /// # Errors
    /// `UnknownType`, `TypeMismatch` for a predicate value of the wrong
    /// kind, `Storage`.
    pub fn search(
        &self,
        type_name: &str,
        predicates: &[(&str, Value)],
        opts: SearchOptions,
    ) -> ModelResult<ResultCursor> {
        let schema = self.schema(type_name)?;
        let keys = schema.keys();
        let buffered = opts.buffered.unwrap_or(self.config.buffered_search);

        let mut sets = Vec::with_capacity(predicates.len());
        for (name, value) in predicates {
            let Some(def) = schema.attribute(name).filter(|d| d.indexed) else {
                tracing::trace!(type_name, attr = name, "ignoring predicate on non-indexed attribute");
                continue;
            };
            let raw = def.kind.coerce(name, value.clone())?.to_raw();
            match self.index.lookup(keys, name, &raw)? {
                Some(set) => sets.push(set),
                None => return Ok(ResultCursor::empty(self.clone(), type_name)),
            }
        }

        let key = match sets.len() {
            0 => None,
            1 => sets.pop(),
            _ => {
                let (dest, pooled) = match opts.result_key {
                    Some(dest) => (dest, false),
                    None => (self.temp_keys.acquire()?, true),
                };
                let size = self.store.zinterstore(&dest, &sets)?;
                if pooled {
                    self.store.expire(&dest, self.temp_keys.ttl())?;
                }
                tracing::trace!(type_name, sets = sets.len(), size, dest = %dest, "intersected index sets");
                Some(dest)
            }
        };
        Ok(ResultCursor::new(self.clone(), type_name, key, buffered))
    }

    /// Delete an entity: its association members first, then its index
    /// entries and every key it owns.
    ///
    /// # Errors
    /// `LockUnavailable` or `Storage`. Members deleted before a failure stay
    /// deleted.
    pub fn delete(&self, model: &Model) -> ModelResult<()> {
        let schema = model.schema()?;
        for association in schema.has_many() {
            model.collection(&association.name)?.delete_all()?;
        }

        let keys = model.keys();
        let id = model.id();
        {
            let _guard = model.lock()?;
            let attributes = keys.attributes(id);
            for def in schema.indexed_attributes() {
                if let Some(raw) = self.store.hget(&attributes, &def.name)? {
                    self.index.remove(keys, &def.name, &raw, id)?;
                }
            }
            for def in schema.embedded_attributes() {
                self.store.del(&keys.embedded(id, &def.name))?;
            }
            for key in [
                attributes,
                keys.version(id),
                keys.snapshots(id),
                keys.dependent_version(id),
            ] {
                self.store.del(&key)?;
            }
            self.store.srem(&keys.ids(), &id.to_string())?;
        }
        self.store.del(&keys.lock(id))?;
        tracing::debug!(type_name = model.type_name(), %id, "deleted entity");
        Ok(())
    }
}

impl fmt::Debug for ModelEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::keys::TEMP_KEYS_POOL;
    use crate::storage::InMemoryStore;
    use crate::value::{AttrKind, CollectionKind};

    fn engine() -> ModelEngine {
        let engine = ModelEngine::new(Arc::new(InMemoryStore::new()));
        engine
            .register(
                EntitySchema::builder("Car")
                    .indexed("team", AttrKind::String)
                    .indexed("engine", AttrKind::String)
                    .attribute("speed", AttrKind::Float)
                    .embedded("tags", CollectionKind::Set)
                    .build(),
            )
            .unwrap();
        engine
    }

    fn car(engine: &ModelEngine, team: &str, motor: &str) -> Model {
        engine
            .create("Car", &[("team", Value::from(team)), ("engine", Value::from(motor))])
            .unwrap()
    }

    #[test]
    fn create_assigns_increasing_ids() {
        let engine = engine();
        let a = engine.create("Car", &[]).unwrap();
        let b = engine.create("Car", &[]).unwrap();
        assert!(b.id() > a.id());
        assert_eq!(a.version().unwrap(), 0);
        assert!(engine.exists("Car", a.id()).unwrap());
    }

    #[test]
    fn create_validates_before_allocating() {
        let engine = engine();
        assert!(engine.create("Car", &[("wings", Value::from(2))]).unwrap_err().is_schema());
        assert!(engine.create("Car", &[("speed", Value::from("x"))]).unwrap_err().is_schema());
        assert!(engine.create("Boat", &[]).unwrap_err().is_schema());
        assert_eq!(engine.store().get("car:highest_id").unwrap(), None);
    }

    #[test]
    fn find_distinguishes_missing() {
        let engine = engine();
        let car = engine.create("Car", &[]).unwrap();
        assert_eq!(engine.find("Car", car.id()).unwrap(), Some(car));
        assert_eq!(engine.find("Car", EntityId::new(999)).unwrap(), None);
    }

    #[test]
    fn search_intersects_predicates() {
        let engine = engine();
        let a = car(&engine, "Ferrari", "V12");
        let _b = car(&engine, "Ferrari", "V8");
        let _c = car(&engine, "Lotus", "V12");

        let found = engine
            .find_all("Car", &[("team", Value::from("Ferrari")), ("engine", Value::from("V12"))])
            .unwrap();
        assert_eq!(found.ids().unwrap(), vec![a.id()]);
        assert!(found.key().unwrap().starts_with("search_results:"));
        assert_eq!(engine.store().zcard(TEMP_KEYS_POOL).unwrap(), 1);
    }

    #[test]
    fn search_with_unknown_value_is_empty() {
        let engine = engine();
        car(&engine, "Ferrari", "V12");
        let found = engine
            .find_all("Car", &[("team", Value::from("Ferrari")), ("engine", Value::from("W16"))])
            .unwrap();
        assert!(found.is_empty().unwrap());
        assert!(found.key().is_none());
    }

    #[test]
    fn search_ignores_non_indexed_predicates() {
        let engine = engine();
        let a = car(&engine, "Ferrari", "V12");
        a.set("speed", 300.0).unwrap();
        let found = engine
            .find_all("Car", &[("team", Value::from("Ferrari")), ("speed", Value::from(1.0))])
            .unwrap();
        assert_eq!(found.ids().unwrap(), vec![a.id()]);

        let none = engine.find_all("Car", &[("speed", Value::from(300.0))]).unwrap();
        assert!(none.is_empty().unwrap());
    }

    #[test]
    fn search_into_caller_key() {
        let engine = engine();
        let a = car(&engine, "Ferrari", "V12");
        let found = engine
            .search(
                "Car",
                &[("team", Value::from("Ferrari")), ("engine", Value::from("V12"))],
                SearchOptions {
                    result_key: Some("mine".to_string()),
                    buffered: Some(false),
                },
            )
            .unwrap();
        assert_eq!(found.key(), Some("mine"));
        assert!(!found.is_buffered());
        assert_eq!(found.ids().unwrap(), vec![a.id()]);
        assert_eq!(engine.store().zcard(TEMP_KEYS_POOL).unwrap(), 0);
    }

    #[test]
    fn find_by_returns_first() {
        let engine = engine();
        let a = car(&engine, "Ferrari", "V12");
        car(&engine, "Ferrari", "V8");
        assert_eq!(
            engine.find_by("Car", &[("team", Value::from("Ferrari"))]).unwrap(),
            Some(a)
        );
        assert_eq!(engine.find_by("Car", &[("team", Value::from("Haas"))]).unwrap(), None);
    }

    #[test]
    fn delete_removes_every_trace() {
        let engine = engine();
        let a = car(&engine, "Ferrari", "V12");
        let tags = a.embedded_key("tags").unwrap();
        engine.store().sadd(&tags, "fast").unwrap();
        a.save_snapshot().unwrap();

        a.delete().unwrap();
        assert!(engine.find("Car", a.id()).unwrap().is_none());
        assert!(engine.find_all("Car", &[("team", Value::from("Ferrari"))]).unwrap().is_empty().unwrap());
        assert!(engine.store().smembers(&tags).unwrap().is_empty());
        assert!(engine.store().hget_all("car:team_index").unwrap().is_empty());
        assert_eq!(engine.store().get(&format!("car:{}:version", a.id())).unwrap(), None);
    }

    #[test]
    fn with_config_validates() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let bad = ModelConfig::default().with_buffer_sizes(0, 0);
        assert!(ModelEngine::with_config(Arc::clone(&store), bad).is_err());

        let good = ModelConfig::default()
            .with_lock_timeout(Some(Duration::from_millis(10)))
            .with_buffered_search(false);
        let engine = ModelEngine::with_config(store, good).unwrap();
        assert!(!engine.config().buffered_search);
    }
}
