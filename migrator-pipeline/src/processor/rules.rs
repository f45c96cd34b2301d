use std::collections::{BTreeMap, BTreeSet};

use migrator_shared::types::EntityType;
use serde::{Deserialize, Serialize};

use crate::mapper::IdentifierMapper;

/// Key of `order_overrides` entries for sections, which have no parent.
pub const ROOT_GROUP: &str = "*";

/// Record-specific corrections applied during transformation.
///
/// These are data, loaded from the rules file, e.g.
///
/// ```json
/// {
///   "excluded": { "question": ["1680000000000x17"] },
///   "duplicates": { "choice": { "1680000000000x42": "1680000000000x41" } },
///   "order_overrides": { "question": { "1680000000000x9": ["q-3", "q-1", "q-2"] } }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformRules {
    /// Legacy artifacts that must not be migrated.
    #[serde(default)]
    pub excluded: BTreeMap<EntityType, BTreeSet<String>>,
    /// Known duplicate records, mapped to the record they duplicate.
    #[serde(default)]
    pub duplicates: BTreeMap<EntityType, BTreeMap<String, String>>,
    /// Explicit child sequences, keyed by the parent's source id.
    #[serde(default)]
    pub order_overrides: BTreeMap<EntityType, BTreeMap<String, Vec<String>>>,
}

impl TransformRules {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn is_excluded(&self, entity: EntityType, source_id: &str) -> bool {
        self.excluded
            .get(&entity)
            .is_some_and(|ids| ids.contains(source_id))
    }

    /// The record `source_id` is a known duplicate of, if any.
    pub fn canonical_of(&self, entity: EntityType, source_id: &str) -> Option<&str> {
        self.duplicates
            .get(&entity)
            .and_then(|dups| dups.get(source_id))
            .map(String::as_str)
    }

    /// 1-based position forced on `source_id` within its parent's group.
    pub fn override_position(
        &self,
        entity: EntityType,
        parent_source_id: Option<&str>,
        source_id: &str,
    ) -> Option<i32> {
        let sequence = self
            .order_overrides
            .get(&entity)?
            .get(parent_source_id.unwrap_or(ROOT_GROUP))?;
        let idx = sequence.iter().position(|id| id == source_id)?;
        i32::try_from(idx + 1).ok()
    }

    /// Aliases every known duplicate to its canonical record, so references
    /// to the duplicate land on the row that was actually written.
    pub fn register_aliases(&self, mapper: &mut IdentifierMapper) {
        for (entity, dups) in &self.duplicates {
            for (duplicate, canonical) in dups {
                mapper.alias(*entity, duplicate, canonical);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty() && self.duplicates.is_empty() && self.order_overrides.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rules_file() {
        let rules = TransformRules::from_json(
            r#"{
                "excluded": { "question": ["q-17"] },
                "duplicates": { "choice": { "c-42": "c-41" } },
                "order_overrides": {
                    "question": { "sub-9": ["q-3", "q-1", "q-2"] },
                    "section": { "*": ["s-2", "s-1"] }
                }
            }"#,
        )
        .unwrap();

        assert!(rules.is_excluded(EntityType::Question, "q-17"));
        assert!(!rules.is_excluded(EntityType::Choice, "q-17"));
        assert_eq!(rules.canonical_of(EntityType::Choice, "c-42"), Some("c-41"));
        assert_eq!(
            rules.override_position(EntityType::Question, Some("sub-9"), "q-1"),
            Some(2)
        );
        assert_eq!(rules.override_position(EntityType::Section, None, "s-1"), Some(2));
        assert_eq!(rules.override_position(EntityType::Question, Some("sub-1"), "q-1"), None);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let rules = TransformRules::from_json("{}").unwrap();
        assert!(rules.is_empty());
    }
}
