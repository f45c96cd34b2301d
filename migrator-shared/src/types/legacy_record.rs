use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::EntityType;

/// Field holding the legacy identifier on every Data API record.
pub const SOURCE_ID_FIELD: &str = "_id";

/// Field holding the legacy creation timestamp.
pub const CREATED_DATE_FIELD: &str = "Created Date";

/// A record as returned by the legacy Data API.
///
/// The payload is kept as an opaque key-value map; it is only interpreted at
/// the transformer boundary, where it is parsed into a [`super::LegacyPayload`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyRecord {
    pub entity_type: EntityType,
    pub source_id: String,
    pub fields: Map<String, Value>,
}

impl LegacyRecord {
    pub fn new(entity_type: EntityType, source_id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            entity_type,
            source_id: source_id.into(),
            fields,
        }
    }

    /// Builds a record from a raw Data API result object.
    ///
    /// Returns `None` when the object has no usable `_id`.
    pub fn from_api_object(entity_type: EntityType, mut object: Map<String, Value>) -> Option<Self> {
        let source_id = match object.remove(SOURCE_ID_FIELD)? {
            Value::String(id) if !id.trim().is_empty() => id,
            _ => return None,
        };
        Some(Self::new(entity_type, source_id, object))
    }

    /// String-valued field, treating blanks as absent.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// List of source ids held in a field, e.g. a parent's child list.
    pub fn id_list_field(&self, name: &str) -> Vec<String> {
        match self.fields.get(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// One page of legacy records plus the API's remaining-count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyPage {
    pub records: Vec<LegacyRecord>,
    /// Positions of results that carried no usable `_id`. Offsets within the
    /// page as returned by a source; the pager rewrites them to listing
    /// positions.
    pub unidentified: Vec<u64>,
    pub remaining: u64,
}

impl LegacyPage {
    /// Results the API returned, with or without an id.
    pub fn returned(&self) -> usize {
        self.records.len() + self.unidentified.len()
    }
}
