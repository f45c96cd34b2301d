//! Entity types of the questionnaire schema and the table metadata the
//! pipeline needs to migrate and reconcile them generically.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A foreign key column on a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForeignKey {
    /// Column holding the referenced row's destination id.
    pub column: &'static str,
    /// Legacy field carrying the referenced record's source id.
    pub legacy_field: &'static str,
    /// Entity type the column points at.
    pub references: EntityType,
    /// Whether a row is meaningless without this reference.
    pub required: bool,
}

/// The entity types migrated from the legacy application.
///
/// Variants are declared in topological order: every entity only references
/// entities declared before it, so `Ord` doubles as migration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Company,
    User,
    Section,
    Subsection,
    Question,
    Choice,
    Sheet,
    Answer,
}

const USER_FKS: &[ForeignKey] = &[ForeignKey {
    column: "company_id",
    legacy_field: "company",
    references: EntityType::Company,
    required: false,
}];

const SUBSECTION_FKS: &[ForeignKey] = &[ForeignKey {
    column: "section_id",
    legacy_field: "section",
    references: EntityType::Section,
    required: true,
}];

const QUESTION_FKS: &[ForeignKey] = &[ForeignKey {
    column: "subsection_id",
    legacy_field: "subsection",
    references: EntityType::Subsection,
    required: true,
}];

const CHOICE_FKS: &[ForeignKey] = &[ForeignKey {
    column: "question_id",
    legacy_field: "question",
    references: EntityType::Question,
    required: true,
}];

const SHEET_FKS: &[ForeignKey] = &[
    ForeignKey {
        column: "company_id",
        legacy_field: "company",
        references: EntityType::Company,
        required: true,
    },
    ForeignKey {
        column: "created_by",
        legacy_field: "created_by",
        references: EntityType::User,
        required: false,
    },
];

const ANSWER_FKS: &[ForeignKey] = &[
    ForeignKey {
        column: "sheet_id",
        legacy_field: "sheet",
        references: EntityType::Sheet,
        required: true,
    },
    ForeignKey {
        column: "question_id",
        legacy_field: "question",
        references: EntityType::Question,
        required: true,
    },
    ForeignKey {
        column: "choice_id",
        legacy_field: "choice",
        references: EntityType::Choice,
        required: false,
    },
];

impl EntityType {
    /// All entity types in topological (migration) order.
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::Company,
            EntityType::User,
            EntityType::Section,
            EntityType::Subsection,
            EntityType::Question,
            EntityType::Choice,
            EntityType::Sheet,
            EntityType::Answer,
        ]
    }

    /// Lowercase singular name, used on the CLI and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Company => "company",
            EntityType::User => "user",
            EntityType::Section => "section",
            EntityType::Subsection => "subsection",
            EntityType::Question => "question",
            EntityType::Choice => "choice",
            EntityType::Sheet => "sheet",
            EntityType::Answer => "answer",
        }
    }

    /// Destination table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityType::Company => "companies",
            EntityType::User => "users",
            EntityType::Section => "sections",
            EntityType::Subsection => "subsections",
            EntityType::Question => "questions",
            EntityType::Choice => "choices",
            EntityType::Sheet => "sheets",
            EntityType::Answer => "answers",
        }
    }

    /// Type name used in the legacy Data API path (`/obj/{type}`).
    pub fn legacy_type_name(&self) -> &'static str {
        self.as_str()
    }

    pub fn foreign_keys(&self) -> &'static [ForeignKey] {
        match self {
            EntityType::Company | EntityType::Section => &[],
            EntityType::User => USER_FKS,
            EntityType::Subsection => SUBSECTION_FKS,
            EntityType::Question => QUESTION_FKS,
            EntityType::Choice => CHOICE_FKS,
            EntityType::Sheet => SHEET_FKS,
            EntityType::Answer => ANSWER_FKS,
        }
    }

    /// Whether rows of this type form ordering groups.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            EntityType::Section | EntityType::Subsection | EntityType::Question | EntityType::Choice
        )
    }

    /// The foreign key whose value identifies an ordering group.
    ///
    /// Sections are ordered but have no parent: the whole table is one group.
    pub fn ordering_parent(&self) -> Option<&'static ForeignKey> {
        match self {
            EntityType::Subsection => Some(&SUBSECTION_FKS[0]),
            EntityType::Question => Some(&QUESTION_FKS[0]),
            EntityType::Choice => Some(&CHOICE_FKS[0]),
            _ => None,
        }
    }

    /// Column compared by duplicate detection.
    pub fn content_column(&self) -> Option<&'static str> {
        match self {
            EntityType::Section | EntityType::Subsection => Some("name"),
            EntityType::Question | EntityType::Choice => Some("content"),
            _ => None,
        }
    }

    /// Legacy field on the parent record that lists this entity's siblings
    /// in display order, e.g. a subsection's `questions`.
    pub fn parent_child_list_field(&self) -> Option<&'static str> {
        match self {
            EntityType::Subsection => Some("subsections"),
            EntityType::Question => Some("questions"),
            EntityType::Choice => Some("choices"),
            _ => None,
        }
    }

    /// Whether a missing reference to this entity may be satisfied by
    /// creating a placeholder row. Only types without required foreign keys
    /// qualify.
    pub fn supports_placeholder(&self) -> bool {
        self.foreign_keys().iter().all(|fk| !fk.required)
    }

    /// Every `(entity, foreign key)` pair that references this entity.
    pub fn dependents(&self) -> Vec<(EntityType, &'static ForeignKey)> {
        EntityType::all()
            .iter()
            .flat_map(|entity| {
                entity
                    .foreign_keys()
                    .iter()
                    .filter(|fk| fk.references == *self)
                    .map(move |fk| (*entity, fk))
            })
            .collect()
    }

    /// Position in migration order.
    pub fn topological_rank(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown entity type: {0}")]
pub struct ParseEntityTypeError(pub String);

impl FromStr for EntityType {
    type Err = ParseEntityTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        EntityType::all()
            .iter()
            .copied()
            .find(|entity| entity.as_str() == needle || entity.table_name() == needle)
            .ok_or_else(|| ParseEntityTypeError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_always_point_backwards_in_migration_order() {
        for entity in EntityType::all() {
            for fk in entity.foreign_keys() {
                assert!(
                    fk.references < *entity,
                    "{entity}.{} references {} which migrates later",
                    fk.column,
                    fk.references
                );
            }
        }
    }

    #[test]
    fn parses_singular_and_table_names() {
        assert_eq!("question".parse::<EntityType>().unwrap(), EntityType::Question);
        assert_eq!("Choices".parse::<EntityType>().unwrap(), EntityType::Choice);
        assert!("tag".parse::<EntityType>().is_err());
    }

    #[test]
    fn question_dependents_are_choices_and_answers() {
        let dependents: Vec<(EntityType, &str)> = EntityType::Question
            .dependents()
            .into_iter()
            .map(|(entity, fk)| (entity, fk.column))
            .collect();
        assert_eq!(
            dependents,
            vec![
                (EntityType::Choice, "question_id"),
                (EntityType::Answer, "question_id")
            ]
        );
    }

    #[test]
    fn placeholders_only_for_types_without_required_parents() {
        let supported: Vec<EntityType> = EntityType::all()
            .iter()
            .copied()
            .filter(EntityType::supports_placeholder)
            .collect();
        assert_eq!(
            supported,
            vec![EntityType::Company, EntityType::User, EntityType::Section]
        );
    }
}
