//! Typed attribute values.
//!
//! Scalars are stored in the backing store as raw strings. Each attribute
//! declares an [`AttrKind`] which decides how raw strings are decoded and
//! which [`Value`] variants may be written to it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// A scalar attribute value.
///
/// Absence is modelled as `Option<Value>::None`; the empty string is a
/// regular value.
///
/// # Examples
///
/// ```
/// use rtmodel::Value;
///
/// let team = Value::from("Ferrari");
/// let speed = Value::from(300.0);
///
/// assert_eq!(team.as_str(), Some("Ferrari"));
/// assert_eq!(speed.to_raw(), "300");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    String(String),
}

impl Value {
    /// Integer payload, if this is an `Int`.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric payload as `f64`. Integers are widened.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::String(_) => None,
        }
    }

    /// Text payload, if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }

    /// Raw form written to the store.
    #[must_use]
    pub fn to_raw(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::String(v) => v.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    #[allow(clippy::cast_possible_wrap)]
    fn from(v: u64) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Store structure backing an embedded-collection attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Hash of field -> value.
    Hash,
    /// List in insertion order.
    List,
    /// Unordered set.
    Set,
    /// Set ordered by score.
    SortedSet,
}

/// Declared kind of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrKind {
    /// Signed 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// UTF-8 text.
    String,
    /// Per-instance store structure living under its own key.
    Embedded(CollectionKind),
}

impl AttrKind {
    /// True for every kind except [`AttrKind::Embedded`].
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        !matches!(self, Self::Embedded(_))
    }

    /// Lowercase name used in error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Embedded(CollectionKind::Hash) => "hash",
            Self::Embedded(CollectionKind::List) => "list",
            Self::Embedded(CollectionKind::Set) => "set",
            Self::Embedded(CollectionKind::SortedSet) => "sorted_set",
        }
    }

    /// Check `value` against this kind, widening integers for float
    /// attributes.
    ///
    /// # Errors
    /// `SchemaError::TypeMismatch` when the value cannot be stored here.
    pub fn coerce(&self, attribute: &str, value: Value) -> Result<Value, SchemaError> {
        match (self, value) {
            (Self::Integer, v @ Value::Int(_))
            | (Self::Float, v @ Value::Float(_))
            | (Self::String, v @ Value::String(_)) => Ok(v),
            #[allow(clippy::cast_precision_loss)]
            (Self::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (Self::Embedded(_), _) => Err(SchemaError::NotScalar {
                attribute: attribute.to_string(),
            }),
            (kind, other) => Err(SchemaError::TypeMismatch {
                attribute: attribute.to_string(),
                expected: kind.name().to_string(),
                actual: other.type_name().to_string(),
            }),
        }
    }

    /// Decode a raw stored string. Returns `None` when it does not parse.
    #[must_use]
    pub fn decode(&self, raw: &str) -> Option<Value> {
        match self {
            Self::Integer => raw.parse().ok().map(Value::Int),
            Self::Float => raw.parse().ok().map(Value::Float),
            Self::String => Some(Value::String(raw.to_string())),
            Self::Embedded(_) => None,
        }
    }
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
