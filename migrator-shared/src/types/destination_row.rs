//! Typed rows of the destination tables.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EntityType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRow {
    pub id: Uuid,
    pub source_id: Option<String>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: Uuid,
    pub source_id: Option<String>,
    pub email: String,
    pub name: Option<String>,
    pub company_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRow {
    pub id: Uuid,
    pub source_id: Option<String>,
    pub name: String,
    pub order_number: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsectionRow {
    pub id: Uuid,
    pub source_id: Option<String>,
    pub section_id: Uuid,
    pub name: String,
    pub order_number: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRow {
    pub id: Uuid,
    pub source_id: Option<String>,
    pub subsection_id: Uuid,
    pub content: String,
    pub question_type: String,
    pub order_number: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceRow {
    pub id: Uuid,
    pub source_id: Option<String>,
    pub question_id: Uuid,
    pub content: String,
    pub order_number: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetRow {
    pub id: Uuid,
    pub source_id: Option<String>,
    pub company_id: Uuid,
    pub created_by: Option<Uuid>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRow {
    pub id: Uuid,
    pub source_id: Option<String>,
    pub sheet_id: Uuid,
    pub question_id: Uuid,
    pub choice_id: Option<Uuid>,
    pub value: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The value of one foreign key column on a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKeyValue {
    pub column: &'static str,
    pub references: EntityType,
    pub id: Option<Uuid>,
}

/// A row destined for one of the destination tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "lowercase")]
pub enum DestinationRow {
    Company(CompanyRow),
    User(UserRow),
    Section(SectionRow),
    Subsection(SubsectionRow),
    Question(QuestionRow),
    Choice(ChoiceRow),
    Sheet(SheetRow),
    Answer(AnswerRow),
}

macro_rules! each_row {
    ($row:expr, $r:ident => $body:expr) => {
        match $row {
            DestinationRow::Company($r) => $body,
            DestinationRow::User($r) => $body,
            DestinationRow::Section($r) => $body,
            DestinationRow::Subsection($r) => $body,
            DestinationRow::Question($r) => $body,
            DestinationRow::Choice($r) => $body,
            DestinationRow::Sheet($r) => $body,
            DestinationRow::Answer($r) => $body,
        }
    };
}

fn fk(column: &'static str, references: EntityType, id: Option<Uuid>) -> ForeignKeyValue {
    ForeignKeyValue {
        column,
        references,
        id,
    }
}

impl DestinationRow {
    pub fn entity_type(&self) -> EntityType {
        match self {
            DestinationRow::Company(_) => EntityType::Company,
            DestinationRow::User(_) => EntityType::User,
            DestinationRow::Section(_) => EntityType::Section,
            DestinationRow::Subsection(_) => EntityType::Subsection,
            DestinationRow::Question(_) => EntityType::Question,
            DestinationRow::Choice(_) => EntityType::Choice,
            DestinationRow::Sheet(_) => EntityType::Sheet,
            DestinationRow::Answer(_) => EntityType::Answer,
        }
    }

    pub fn id(&self) -> Uuid {
        each_row!(self, r => r.id)
    }

    pub fn source_id(&self) -> Option<&str> {
        each_row!(self, r => r.source_id.as_deref())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        each_row!(self, r => r.created_at)
    }

    /// Returns the same row under a different destination id.
    pub fn with_id(mut self, id: Uuid) -> Self {
        each_row!(&mut self, r => r.id = id);
        self
    }

    pub fn foreign_keys(&self) -> Vec<ForeignKeyValue> {
        match self {
            DestinationRow::Company(_) | DestinationRow::Section(_) => Vec::new(),
            DestinationRow::User(r) => vec![fk("company_id", EntityType::Company, r.company_id)],
            DestinationRow::Subsection(r) => {
                vec![fk("section_id", EntityType::Section, Some(r.section_id))]
            }
            DestinationRow::Question(r) => {
                vec![fk("subsection_id", EntityType::Subsection, Some(r.subsection_id))]
            }
            DestinationRow::Choice(r) => {
                vec![fk("question_id", EntityType::Question, Some(r.question_id))]
            }
            DestinationRow::Sheet(r) => vec![
                fk("company_id", EntityType::Company, Some(r.company_id)),
                fk("created_by", EntityType::User, r.created_by),
            ],
            DestinationRow::Answer(r) => vec![
                fk("sheet_id", EntityType::Sheet, Some(r.sheet_id)),
                fk("question_id", EntityType::Question, Some(r.question_id)),
                fk("choice_id", EntityType::Choice, r.choice_id),
            ],
        }
    }

    /// Value held in the named foreign key column.
    pub fn foreign_key(&self, column: &str) -> Option<Uuid> {
        self.foreign_keys()
            .into_iter()
            .find(|fk| fk.column == column)
            .and_then(|fk| fk.id)
    }

    /// Clears an optional reference. Required references are left untouched
    /// and `false` is returned.
    pub fn clear_foreign_key(&mut self, column: &str) -> bool {
        match (self, column) {
            (DestinationRow::User(r), "company_id") => r.company_id.take().is_some(),
            (DestinationRow::Sheet(r), "created_by") => r.created_by.take().is_some(),
            (DestinationRow::Answer(r), "choice_id") => r.choice_id.take().is_some(),
            _ => false,
        }
    }

    /// `(parent id, order number)` for rows that belong to an ordering group.
    pub fn ordering(&self) -> Option<(Option<Uuid>, Option<i32>)> {
        match self {
            DestinationRow::Section(r) => Some((None, r.order_number)),
            DestinationRow::Subsection(r) => Some((Some(r.section_id), r.order_number)),
            DestinationRow::Question(r) => Some((Some(r.subsection_id), r.order_number)),
            DestinationRow::Choice(r) => Some((Some(r.question_id), r.order_number)),
            _ => None,
        }
    }

    pub fn set_order_number(&mut self, order_number: Option<i32>) -> bool {
        match self {
            DestinationRow::Section(r) => r.order_number = order_number,
            DestinationRow::Subsection(r) => r.order_number = order_number,
            DestinationRow::Question(r) => r.order_number = order_number,
            DestinationRow::Choice(r) => r.order_number = order_number,
            _ => return false,
        }
        true
    }

    /// Text compared by duplicate detection.
    pub fn content(&self) -> Option<&str> {
        match self {
            DestinationRow::Section(r) => Some(&r.name),
            DestinationRow::Subsection(r) => Some(&r.name),
            DestinationRow::Question(r) => Some(&r.content),
            DestinationRow::Choice(r) => Some(&r.content),
            _ => None,
        }
    }

    /// Minimal row standing in for a referenced record that never made it
    /// out of the legacy system.
    ///
    /// Only entity types without required references can be placeholders.
    pub fn placeholder(
        entity: EntityType,
        source_id: &str,
        id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Option<Self> {
        let source_id = Some(source_id.to_string());
        let label = format!("[placeholder {}]", source_id.as_deref().unwrap_or_default());
        let row = match entity {
            EntityType::Company => DestinationRow::Company(CompanyRow {
                id,
                source_id,
                name: label,
                created_at,
            }),
            EntityType::User => DestinationRow::User(UserRow {
                id,
                email: format!("placeholder+{}@invalid", source_id.as_deref().unwrap_or_default()),
                source_id,
                name: Some(label),
                company_id: None,
                created_at,
            }),
            EntityType::Section => DestinationRow::Section(SectionRow {
                id,
                source_id,
                name: label,
                order_number: None,
                created_at,
            }),
            _ => return None,
        };
        Some(row)
    }
}
