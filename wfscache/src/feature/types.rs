//! Feature, attribute and schema type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Extent;

/// Value of the generation counter.
///
/// Every batch written to the feature store is stamped with the next
/// generation value; the counter only moves forward within an epoch.
pub type Generation = u64;

/// Generation counter value of an empty cache.
pub const INITIAL_GENERATION: Generation = 0;

/// Local row identifier assigned by the feature store.
///
/// Distinct from the server-assigned stable id; mutations coming from the
/// consumer address features by local id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(pub i64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Encoded feature geometry with its bounding box.
///
/// The encoding is chosen by the remote source (the HTTP source stores the
/// GeoJSON geometry object). The cache only ever looks at `bounds`.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub bounds: Extent,
    pub encoded: Vec<u8>,
}

impl Geometry {
    pub fn new(bounds: Extent, encoded: Vec<u8>) -> Self {
        Self { bounds, encoded }
    }
}

/// Declared type of an attribute field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Bool,
    Integer,
    Double,
    Text,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Bool => write!(f, "bool"),
            FieldKind::Integer => write!(f, "integer"),
            FieldKind::Double => write!(f, "double"),
            FieldKind::Text => write!(f, "text"),
        }
    }
}

/// One attribute field of the layer schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A single attribute value.
///
/// Serialized untagged so the attribute vector of a row is stored as a plain
/// JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Best-effort kind of a non-null value.
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(_) => Some(FieldKind::Bool),
            FieldValue::Integer(_) => Some(FieldKind::Integer),
            FieldValue::Double(_) => Some(FieldKind::Double),
            FieldValue::Text(_) => Some(FieldKind::Text),
        }
    }
}

/// A feature as decoded from a remote response page.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFeature {
    /// Server-assigned durable identifier (`fid` / `gml:id`).
    pub stable_id: String,
    pub geometry: Option<Geometry>,
    /// Attribute values in schema order.
    pub attributes: Vec<FieldValue>,
}

impl SourceFeature {
    pub fn new(
        stable_id: impl Into<String>,
        geometry: Option<Geometry>,
        attributes: Vec<FieldValue>,
    ) -> Self {
        Self {
            stable_id: stable_id.into(),
            geometry,
            attributes,
        }
    }
}

/// A feature row persisted in the feature store.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFeature {
    pub local_id: LocalId,
    /// Generation the row was written under. Fixed at write time.
    pub generation: Generation,
    pub stable_id: String,
    pub geometry: Option<Geometry>,
    pub attributes: Vec<FieldValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_values_round_trip_as_json_array() {
        let values = vec![
            FieldValue::Null,
            FieldValue::Bool(true),
            FieldValue::Integer(42),
            FieldValue::Double(1.5),
            FieldValue::Text("main street".to_string()),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"[null,true,42,1.5,"main street"]"#);

        let decoded: Vec<FieldValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_whole_double_stays_double() {
        let json = serde_json::to_string(&FieldValue::Double(2.0)).unwrap();
        let decoded: FieldValue = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, FieldValue::Double(2.0));
    }

    #[test]
    fn test_field_value_kind() {
        assert_eq!(FieldValue::Null.kind(), None);
        assert_eq!(FieldValue::Integer(1).kind(), Some(FieldKind::Integer));
        assert!(FieldValue::Null.is_null());
    }

    #[test]
    fn test_local_id_display() {
        assert_eq!(format!("{}", LocalId(17)), "#17");
    }
}
