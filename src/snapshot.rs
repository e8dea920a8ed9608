//! Point-in-time captures of entities and their codecs.
//!
//! Snapshots are appended to a per-entity sorted set scored by capture time,
//! so the log can be queried by time without decoding anything.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::model::EntityId;
use crate::value::Value;

/// Serializable capture of one entity.
///
/// The top level carries the version it was taken at; nested association
/// members carry only id and attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Entity id.
    pub id: EntityId,
    /// Version at capture time. Absent on nested members.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Every declared scalar attribute, `None` when unset.
    pub attributes: BTreeMap<String, Option<Value>>,
    /// Members of each one-to-many association, in order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub collections: BTreeMap<String, Vec<Snapshot>>,
}

impl Snapshot {
    /// Attribute value, `None` when absent or undeclared.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).and_then(Option::as_ref)
    }

    /// Members of an association, empty when the association is unknown.
    #[must_use]
    pub fn collection(&self, name: &str) -> &[Snapshot] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Encodes snapshots into store members and back.
///
/// Encodings must be valid UTF-8 text.
pub trait SnapshotCodec: Send + Sync {
    /// # Errors
    /// `Codec` if the snapshot cannot be encoded.
    fn encode(&self, snapshot: &Snapshot) -> ModelResult<String>;

    /// # Errors
    /// `Codec` if `encoded` is not a snapshot.
    fn decode(&self, encoded: &str) -> ModelResult<Snapshot>;
}

/// JSON snapshot encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSnapshotCodec;

impl SnapshotCodec for JsonSnapshotCodec {
    fn encode(&self, snapshot: &Snapshot) -> ModelResult<String> {
        serde_json::to_string(snapshot).map_err(|e| ModelError::Codec {
            message: e.to_string(),
        })
    }

    fn decode(&self, encoded: &str) -> ModelResult<Snapshot> {
        serde_json::from_str(encoded).map_err(|e| ModelError::Codec {
            message: e.to_string(),
        })
    }
}

/// Sorted-set score for a capture taken at `at`: fractional unix seconds.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn capture_score(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        let member = Snapshot {
            id: EntityId::new(2),
            version: None,
            attributes: BTreeMap::from([("team".to_string(), Some(Value::from("Ferrari")))]),
            collections: BTreeMap::new(),
        };
        Snapshot {
            id: EntityId::new(1),
            version: Some(4),
            attributes: BTreeMap::from([
                ("name".to_string(), Some(Value::from("Monza"))),
                ("laps".to_string(), Some(Value::from(53))),
                ("length".to_string(), Some(Value::from(5.793))),
                ("winner".to_string(), None),
            ]),
            collections: BTreeMap::from([("cars".to_string(), vec![member])]),
        }
    }

    #[test]
    fn json_codec_preserves_snapshot() {
        let codec = JsonSnapshotCodec;
        let snapshot = sample();
        let encoded = codec.encode(&snapshot).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), snapshot);
    }

    #[test]
    fn nested_members_omit_version() {
        let encoded = JsonSnapshotCodec.encode(&sample()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(json["version"], 4);
        assert!(json["collections"]["cars"][0].get("version").is_none());
        assert!(json["collections"]["cars"][0].get("collections").is_none());
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = JsonSnapshotCodec.decode("not json").unwrap_err();
        assert!(matches!(err, ModelError::Codec { .. }));
    }

    #[test]
    fn accessors() {
        let snapshot = sample();
        assert_eq!(snapshot.attribute("name"), Some(&Value::from("Monza")));
        assert_eq!(snapshot.attribute("winner"), None);
        assert_eq!(snapshot.collection("cars").len(), 1);
        assert!(snapshot.collection("boats").is_empty());
    }

    #[test]
    fn capture_scores_follow_time() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(5);
        assert!(capture_score(earlier) < capture_score(later));
    }
}
