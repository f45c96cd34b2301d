use std::collections::HashMap;

use migrator_shared::types::{EntityType, LegacyRecord};

/// Display positions of child records, as listed on their parents.
///
/// Built from parent records as they stream past, so it only knows the
/// children of parents already paged in the current run.
#[derive(Debug, Clone, Default)]
pub struct SiblingPositions {
    positions: HashMap<(EntityType, String), i32>,
}

impl SiblingPositions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the child lists carried by `parent`.
    pub fn observe(&mut self, parent: &LegacyRecord) {
        for child in EntityType::all() {
            let listed_here = child
                .ordering_parent()
                .is_some_and(|fk| fk.references == parent.entity_type);
            let Some(field) = child.parent_child_list_field().filter(|_| listed_here) else {
                continue;
            };
            for (idx, child_id) in parent.id_list_field(field).into_iter().enumerate() {
                let Ok(position) = i32::try_from(idx + 1) else {
                    break;
                };
                self.positions.entry((*child, child_id)).or_insert(position);
            }
        }
    }

    pub fn position(&self, entity: EntityType, source_id: &str) -> Option<i32> {
        self.positions.get(&(entity, source_id.to_string())).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_child_positions_of_a_parent() {
        let fields = json!({ "name": "Storage", "section": "s-1", "questions": ["q-2", "q-1"] });
        let parent = LegacyRecord::new(
            EntityType::Subsection,
            "sub-1",
            fields.as_object().cloned().unwrap_or_default(),
        );

        let mut positions = SiblingPositions::new();
        positions.observe(&parent);

        assert_eq!(positions.position(EntityType::Question, "q-2"), Some(1));
        assert_eq!(positions.position(EntityType::Question, "q-1"), Some(2));
        assert_eq!(positions.position(EntityType::Choice, "q-1"), None);
        assert_eq!(positions.len(), 2);
    }
}
