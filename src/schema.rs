//! Entity schemas and their registry.
//!
//! A schema lists a type's attributes (scalar kinds or embedded collections),
//! which of them are indexed, and the type's associations. Schemas are
//! registered once per engine; registering an owner of a one-to-many
//! association injects the synthetic `<owner>_id` foreign key into the item
//! type and marks it indexed.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult, SchemaError};
use crate::keys::{TypeKeys, RESERVED_ENTITY_SUFFIXES};
use crate::value::{AttrKind, CollectionKind};

/// One declared attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    /// Attribute name.
    pub name: String,
    /// Scalar kind or embedded collection.
    pub kind: AttrKind,
    /// Whether the attribute has an ordered index.
    pub indexed: bool,
}

/// A named association to another entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    /// Association name, unique within the owner.
    pub name: String,
    /// Type of the associated entities.
    pub item_type: String,
}

impl Association {
    /// Attribute holding the referenced id of a one-to-one association.
    #[must_use]
    pub fn id_attribute(&self) -> String {
        format!("{}_id", self.name)
    }
}

/// Static description of an entity type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: String,
    keys: TypeKeys,
    attributes: Vec<AttributeDefinition>,
    has_many: Vec<Association>,
    has_one: Vec<Association>,
}

impl EntitySchema {
    /// Start declaring a type.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtmodel::{AttrKind, EntitySchema};
    ///
    /// let car = EntitySchema::builder("Car")
    ///     .indexed("team", AttrKind::String)
    ///     .attribute("speed", AttrKind::Float)
    ///     .has_one("driver", "Driver")
    ///     .build();
    ///
    /// assert!(car.attribute("team").unwrap().indexed);
    /// assert!(car.attribute("driver_id").is_some());
    /// ```
    #[must_use]
    pub fn builder(name: impl Into<String>) -> EntitySchemaBuilder {
        let name = name.into();
        EntitySchemaBuilder {
            schema: Self {
                keys: TypeKeys::new(&name),
                name,
                attributes: Vec::new(),
                has_many: Vec::new(),
                has_one: Vec::new(),
            },
        }
    }

    /// Registered type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key layout for this type.
    #[must_use]
    pub fn keys(&self) -> &TypeKeys {
        &self.keys
    }

    /// Foreign key injected into item types of this type's one-to-many
    /// associations.
    #[must_use]
    pub fn foreign_key(&self) -> String {
        format!("{}_id", self.keys.prefix())
    }

    /// Declared attributes in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeDefinition] {
        &self.attributes
    }

    /// Attribute named `name`, if declared.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Attributes stored in the attributes hash.
    pub fn scalar_attributes(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.attributes.iter().filter(|a| a.kind.is_scalar())
    }

    /// Attributes living under their own key.
    pub fn embedded_attributes(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.attributes.iter().filter(|a| !a.kind.is_scalar())
    }

    /// Attributes with an ordered index.
    pub fn indexed_attributes(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.attributes.iter().filter(|a| a.indexed)
    }

    /// True if `name` is declared and indexed.
    #[must_use]
    pub fn is_indexed(&self, name: &str) -> bool {
        self.attribute(name).is_some_and(|a| a.indexed)
    }

    /// One-to-many associations.
    #[must_use]
    pub fn has_many(&self) -> &[Association] {
        &self.has_many
    }

    /// One-to-one associations.
    #[must_use]
    pub fn has_one(&self) -> &[Association] {
        &self.has_one
    }

    /// Look up a declared scalar attribute.
    ///
    /// # Errors
    /// `UnknownAttribute` or `NotScalar`.
    pub fn scalar(&self, name: &str) -> Result<&AttributeDefinition, SchemaError> {
        let def = self.attribute(name).ok_or_else(|| SchemaError::UnknownAttribute {
            type_name: self.name.clone(),
            attribute: name.to_string(),
        })?;
        if !def.kind.is_scalar() {
            return Err(SchemaError::NotScalar {
                attribute: name.to_string(),
            });
        }
        Ok(def)
    }

    /// Look up a one-to-many association.
    ///
    /// # Errors
    /// `UnknownAssociation`.
    pub fn many(&self, name: &str) -> Result<&Association, SchemaError> {
        self.has_many
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| self.unknown_association(name))
    }

    /// Look up a one-to-one association.
    ///
    /// # Errors
    /// `UnknownAssociation`.
    pub fn one(&self, name: &str) -> Result<&Association, SchemaError> {
        self.has_one
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| self.unknown_association(name))
    }

    fn unknown_association(&self, name: &str) -> SchemaError {
        SchemaError::UnknownAssociation {
            type_name: self.name.clone(),
            association: name.to_string(),
        }
    }

    fn upsert_attribute(&mut self, def: AttributeDefinition) {
        match self.attributes.iter_mut().find(|a| a.name == def.name) {
            Some(existing) => *existing = def,
            None => self.attributes.push(def),
        }
    }

    /// Ensure `name` exists as an indexed integer attribute.
    fn ensure_foreign_key(&mut self, name: &str) {
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.indexed = true,
            None => self.attributes.push(AttributeDefinition {
                name: name.to_string(),
                kind: AttrKind::Integer,
                indexed: true,
            }),
        }
    }
}

/// Builder returned by [`EntitySchema::builder`].
#[derive(Debug, Clone)]
pub struct EntitySchemaBuilder {
    schema: EntitySchema,
}

impl EntitySchemaBuilder {
    /// Declare a non-indexed attribute.
    #[must_use]
    pub fn attribute(self, name: impl Into<String>, kind: AttrKind) -> Self {
        self.declare(name.into(), kind, false)
    }

    /// Declare an indexed scalar attribute.
    #[must_use]
    pub fn indexed(self, name: impl Into<String>, kind: AttrKind) -> Self {
        self.declare(name.into(), kind, kind.is_scalar())
    }

    /// Declare an embedded collection attribute.
    #[must_use]
    pub fn embedded(self, name: impl Into<String>, kind: CollectionKind) -> Self {
        self.declare(name.into(), AttrKind::Embedded(kind), false)
    }

    /// Declare an ordered one-to-many association.
    #[must_use]
    pub fn has_many(mut self, name: impl Into<String>, item_type: impl Into<String>) -> Self {
        self.schema.has_many.push(Association {
            name: name.into(),
            item_type: item_type.into(),
        });
        self
    }

    /// Declare a one-to-one association, stored in `<name>_id`.
    #[must_use]
    pub fn has_one(mut self, name: impl Into<String>, item_type: impl Into<String>) -> Self {
        let assoc = Association {
            name: name.into(),
            item_type: item_type.into(),
        };
        let id_attr = assoc.id_attribute();
        self.schema.has_one.push(assoc);
        self.declare(id_attr, AttrKind::Integer, false)
    }

    fn declare(mut self, name: String, kind: AttrKind, indexed: bool) -> Self {
        self.schema
            .upsert_attribute(AttributeDefinition { name, kind, indexed });
        self
    }

    /// Finish the schema.
    #[must_use]
    pub fn build(self) -> EntitySchema {
        self.schema
    }
}

/// Registry of the entity types known to an engine.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: RwLock<HashMap<String, Arc<EntitySchema>>>,
}

impl SchemaRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type. Item types of its one-to-many associations must be
    /// registered first (or be the type itself); each receives the owner's
    /// foreign key as an indexed attribute.
    ///
    /// # Errors
    /// `DuplicateType` if already registered, `UnknownType` for a missing
    /// association item type, `ReservedAttribute` for an embedded attribute
    /// whose key would collide with the entity's own keys.
    pub fn register(&self, mut schema: EntitySchema) -> ModelResult<Arc<EntitySchema>> {
        if let Some(def) = schema
            .embedded_attributes()
            .find(|def| RESERVED_ENTITY_SUFFIXES.contains(&def.name.as_str()))
        {
            return Err(SchemaError::ReservedAttribute {
                type_name: schema.name().to_string(),
                attribute: def.name.clone(),
            }
            .into());
        }

        let mut types = self
            .types
            .write()
            .map_err(|_| ModelError::internal("schema registry lock poisoned"))?;

        if types.contains_key(schema.name()) {
            return Err(SchemaError::DuplicateType {
                type_name: schema.name().to_string(),
            }
            .into());
        }

        let foreign_key = schema.foreign_key();
        let mut updated_items = Vec::new();
        for assoc in &schema.has_many {
            if assoc.item_type == schema.name {
                continue;
            }
            let item = types
                .get(&assoc.item_type)
                .ok_or_else(|| SchemaError::UnknownType {
                    type_name: assoc.item_type.clone(),
                })?;
            let mut item = EntitySchema::clone(item);
            item.ensure_foreign_key(&foreign_key);
            updated_items.push(item);
        }
        if schema.has_many.iter().any(|a| a.item_type == schema.name) {
            schema.ensure_foreign_key(&foreign_key);
        }

        for item in updated_items {
            types.insert(item.name.clone(), Arc::new(item));
        }
        let schema = Arc::new(schema);
        types.insert(schema.name.clone(), Arc::clone(&schema));
        tracing::debug!(type_name = %schema.name, "registered entity type");
        Ok(schema)
    }

    /// Fetch a registered type.
    ///
    /// # Errors
    /// `UnknownType` if the type was never registered.
    pub fn get(&self, type_name: &str) -> ModelResult<Arc<EntitySchema>> {
        let types = self
            .types
            .read()
            .map_err(|_| ModelError::internal("schema registry lock poisoned"))?;
        types.get(type_name).cloned().ok_or_else(|| {
            SchemaError::UnknownType {
                type_name: type_name.to_string(),
            }
            .into()
        })
    }

    /// Names of every registered type.
    pub fn type_names(&self) -> ModelResult<Vec<String>> {
        let types = self
            .types
            .read()
            .map_err(|_| ModelError::internal("schema registry lock poisoned"))?;
        let mut names: Vec<String> = types.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
