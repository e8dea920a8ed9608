//! # rtmodel - Realtime object layer over an ordered key-value store
//!
//! rtmodel maps typed entities onto a Redis-like store so that many
//! processes can share live, versioned state. Every mutation is serialized
//! by a store-resident lock, bumps a per-entity version counter, and keeps
//! ordered secondary indexes in step with the data.
//!
//! ## Core Concepts
//!
//! - **Entity**: a typed record addressed by type name and [`EntityId`]
//! - **Index**: value -> ordered id set, for equality search and ordering
//! - **Collection**: an ordered one-to-many association built on an index
//! - **Version**: a counter bumped on every committed change, propagated
//!   from association members to their owner
//! - **Snapshot**: a serialized capture of an entity and its members
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use rtmodel::{AttrKind, EntitySchema, InMemoryStore, ModelEngine, Value};
//!
//! let engine = ModelEngine::new(Arc::new(InMemoryStore::new()));
//! engine.register(
//!     EntitySchema::builder("Car")
//!         .indexed("team", AttrKind::String)
//!         .attribute("speed", AttrKind::Float)
//!         .build(),
//! )?;
//! engine.register(EntitySchema::builder("Race").has_many("cars", "Car").build())?;
//!
//! let race = engine.create("Race", &[])?;
//! let car = engine.create("Car", &[("team", Value::from("Ferrari"))])?;
//! race.collection("cars")?.add(&car)?;
//!
//! let ferraris = engine.find_all("Car", &[("team", Value::from("Ferrari"))])?;
//! assert_eq!(ferraris.ids()?, vec![car.id()]);
//! assert_eq!(race.collection("cars")?.len()?, 1);
//! # Ok::<(), rtmodel::ModelError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod collection;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod index;
pub mod keys;
pub mod lock;
pub mod model;
pub mod schema;
pub mod snapshot;
pub mod storage;
pub mod temp_keys;
pub mod value;

pub use collection::Collection;
pub use config::ModelConfig;
pub use cursor::{CursorIter, ResultCursor};
pub use engine::{ModelEngine, SearchOptions};
pub use error::{ModelError, ModelResult, SchemaError};
pub use model::{EntityId, Model, SetOptions};
pub use schema::{Association, AttributeDefinition, EntitySchema, EntitySchemaBuilder, SchemaRegistry};
pub use snapshot::{JsonSnapshotCodec, Snapshot, SnapshotCodec};
pub use storage::{InMemoryStore, KeyValueStore, StorageError};
pub use value::{AttrKind, CollectionKind, Value};
