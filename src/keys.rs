//! Logical key layout.
//!
//! Every key the object layer touches is built here so the layout lives in
//! one place:
//!
//! ```text
//! <type>:highest_id               counter
//! <type>:ids                      set of live ids
//! <type>:<id>:attributes          hash  attr -> raw value
//! <type>:<id>:version             counter
//! <type>:<id>:lock                scalar lock token
//! <type>:<id>:dependent_version   scalar key of an owner's version counter
//! <type>:<id>:snapshots           sorted set, score = capture time
//! <type>:<id>:<attr>              embedded collection
//! <type>:<attr>_index             hash  raw value -> id set key
//! <type>:<attr>_index:<value>     sorted set of ids
//! ```

use crate::model::EntityId;

/// Pool of scratch keys used by multi-index search.
pub const TEMP_KEYS_POOL: &str = "temp_keys_pool";

/// Prefix of scratch intersection keys.
pub const SEARCH_RESULTS_PREFIX: &str = "search_results";

/// Per-entity key suffixes owned by the object layer. An embedded attribute
/// with one of these names would alias that key.
pub const RESERVED_ENTITY_SUFFIXES: [&str; 5] =
    ["attributes", "version", "lock", "dependent_version", "snapshots"];

/// Convert a type name to its key prefix: `RaceCar` -> `race_car`.
#[must_use]
pub fn underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev.is_some_and(|p| p != '_' && p != ':') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

/// Keys scoped to one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeKeys {
    prefix: String,
}

impl TypeKeys {
    /// Keys for `type_name`, prefixed with its snake_case form.
    #[must_use]
    pub fn new(type_name: &str) -> Self {
        Self {
            prefix: underscore(type_name),
        }
    }

    /// Snake_case type prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Counter handing out ids.
    #[must_use]
    pub fn highest_id(&self) -> String {
        format!("{}:highest_id", self.prefix)
    }

    /// Set of live ids.
    #[must_use]
    pub fn ids(&self) -> String {
        format!("{}:ids", self.prefix)
    }

    /// Hash of raw attribute values.
    #[must_use]
    pub fn attributes(&self, id: EntityId) -> String {
        format!("{}:{id}:attributes", self.prefix)
    }

    /// Version counter.
    #[must_use]
    pub fn version(&self, id: EntityId) -> String {
        format!("{}:{id}:version", self.prefix)
    }

    /// Lock token scalar.
    #[must_use]
    pub fn lock(&self, id: EntityId) -> String {
        format!("{}:{id}:lock", self.prefix)
    }

    /// Scalar naming the owner's version counter.
    #[must_use]
    pub fn dependent_version(&self, id: EntityId) -> String {
        format!("{}:{id}:dependent_version", self.prefix)
    }

    /// Snapshot log.
    #[must_use]
    pub fn snapshots(&self, id: EntityId) -> String {
        format!("{}:{id}:snapshots", self.prefix)
    }

    /// Key of an embedded collection attribute.
    #[must_use]
    pub fn embedded(&self, id: EntityId, attr: &str) -> String {
        format!("{}:{id}:{attr}", self.prefix)
    }

    /// Hash mapping raw values of `attr` to id set keys.
    #[must_use]
    pub fn index(&self, attr: &str) -> String {
        format!("{}:{attr}_index", self.prefix)
    }

    /// Id set of entities whose `attr` equals `raw_value`.
    #[must_use]
    pub fn id_set(&self, attr: &str, raw_value: &str) -> String {
        format!("{}:{attr}_index:{raw_value}", self.prefix)
    }
}
