//! This module defines the `RecordTransformer`, which turns one legacy
//! record into one destination row.
//!
//! Transformation is a pure function of the record, the mapper, the sibling
//! positions seen so far and the rules: the same inputs always give the same
//! row, byte for byte. Creating missing parents is left to the caller.
mod positions;
mod rules;

pub use positions::SiblingPositions;
pub use rules::{TransformRules, ROOT_GROUP};

use chrono::{DateTime, Utc};
use migrator_shared::types::{
    AnswerRow, ChoiceRow, CompanyRow, DestinationRow, EntityType, LegacyPayload, LegacyRecord,
    PayloadError, QuestionRow, SectionRow, SheetRow, SubsectionRow, UserRow,
};
use serde::Serialize;
use uuid::Uuid;

pub use crate::errors::ProcessorError;
use crate::mapper::IdentifierMapper;

/// Question type of a question that lists choices but names no type.
pub const DEFAULT_CHOICE_QUESTION_TYPE: &str = "single_choice";
/// Question type of a question with neither a type nor choices.
pub const DEFAULT_QUESTION_TYPE: &str = "text";
pub const DEFAULT_SHEET_NAME: &str = "Untitled sheet";

/// Why a well-formed record is deliberately not migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    Excluded,
    Duplicate { canonical: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformSkip {
    pub entity: EntityType,
    pub source_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Transformed {
    Row(DestinationRow),
    Skip(TransformSkip),
}

pub struct RecordTransformer {
    rules: TransformRules,
}

struct Context<'a> {
    record: &'a LegacyRecord,
    mapper: &'a IdentifierMapper,
    positions: &'a SiblingPositions,
    rules: &'a TransformRules,
}

impl Context<'_> {
    fn entity(&self) -> EntityType {
        self.record.entity_type
    }

    fn source_id(&self) -> &str {
        &self.record.source_id
    }

    /// Destination id of the row this record becomes.
    fn own_id(&self) -> Uuid {
        self.mapper
            .resolve(self.entity(), self.source_id())
            .unwrap_or_else(|| self.mapper.mint(self.entity(), self.source_id()))
    }

    fn reference(
        &self,
        field: &'static str,
        references: EntityType,
        target_source_id: &str,
    ) -> Result<Uuid, ProcessorError> {
        self.mapper
            .resolve(references, target_source_id)
            .ok_or_else(|| ProcessorError::MissingReference {
                entity: self.entity(),
                source_id: self.source_id().to_string(),
                field,
                references,
                target_source_id: target_source_id.to_string(),
            })
    }

    fn optional_reference(
        &self,
        field: &'static str,
        references: EntityType,
        target_source_id: Option<&str>,
    ) -> Result<Option<Uuid>, ProcessorError> {
        target_source_id
            .map(|target| self.reference(field, references, target))
            .transpose()
    }

    /// Override, then the record's own order, then its place in the parent's
    /// child list. `None` is left for ordering repair.
    fn order_number(&self, payload: &LegacyPayload, parent_source_id: Option<&str>) -> Option<i32> {
        self.rules
            .override_position(self.entity(), parent_source_id, self.source_id())
            .or_else(|| payload.order_number())
            .or_else(|| self.positions.position(self.entity(), self.source_id()))
    }
}

impl RecordTransformer {
    pub fn new(rules: TransformRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &TransformRules {
        &self.rules
    }

    /// Transforms `record` into its destination row.
    ///
    /// # Returns
    ///
    /// * `Ok(Transformed::Row)` - The row to write
    /// * `Ok(Transformed::Skip)` - The rules exclude the record
    /// * `Err(ProcessorError::MissingReference)` - A referenced record has no
    ///   destination id yet
    /// * `Err(ProcessorError::Validation)` - The record is malformed
    pub fn transform(
        &self,
        record: &LegacyRecord,
        mapper: &IdentifierMapper,
        positions: &SiblingPositions,
    ) -> Result<Transformed, ProcessorError> {
        let entity = record.entity_type;
        let source_id = record.source_id.as_str();

        if self.rules.is_excluded(entity, source_id) {
            return Ok(Transformed::Skip(TransformSkip {
                entity,
                source_id: source_id.to_string(),
                reason: SkipReason::Excluded,
            }));
        }
        if let Some(canonical) = self.rules.canonical_of(entity, source_id) {
            return Ok(Transformed::Skip(TransformSkip {
                entity,
                source_id: source_id.to_string(),
                reason: SkipReason::Duplicate {
                    canonical: canonical.to_string(),
                },
            }));
        }

        let payload = LegacyPayload::parse(record).map_err(|e| ProcessorError::Validation {
            entity,
            source_id: source_id.to_string(),
            reason: match e {
                PayloadError::MissingField(field) => format!("missing required field `{field}`"),
                PayloadError::Malformed(reason) => reason,
            },
        })?;

        let ctx = Context {
            record,
            mapper,
            positions,
            rules: &self.rules,
        };
        let id = ctx.own_id();
        let created_at = payload.created_at().unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let source_id = Some(source_id.to_string());

        let row = match &payload {
            LegacyPayload::Company(p) => DestinationRow::Company(CompanyRow {
                id,
                source_id,
                name: p.name.trim().to_string(),
                created_at,
            }),
            LegacyPayload::User(p) => DestinationRow::User(UserRow {
                id,
                source_id,
                email: p.email.trim().to_lowercase(),
                name: p.name.clone(),
                company_id: ctx.optional_reference("company", EntityType::Company, p.company.as_deref())?,
                created_at,
            }),
            LegacyPayload::Section(p) => DestinationRow::Section(SectionRow {
                id,
                source_id,
                name: p.name.trim().to_string(),
                order_number: ctx.order_number(&payload, None),
                created_at,
            }),
            LegacyPayload::Subsection(p) => DestinationRow::Subsection(SubsectionRow {
                id,
                source_id,
                section_id: ctx.reference("section", EntityType::Section, &p.section)?,
                name: p.name.trim().to_string(),
                order_number: ctx.order_number(&payload, Some(p.section.as_str())),
                created_at,
            }),
            LegacyPayload::Question(p) => DestinationRow::Question(QuestionRow {
                id,
                source_id,
                subsection_id: ctx.reference("subsection", EntityType::Subsection, &p.subsection)?,
                content: p.content.trim().to_string(),
                question_type: p.question_type.clone().unwrap_or_else(|| {
                    if p.choices.is_empty() {
                        DEFAULT_QUESTION_TYPE.to_string()
                    } else {
                        DEFAULT_CHOICE_QUESTION_TYPE.to_string()
                    }
                }),
                order_number: ctx.order_number(&payload, Some(p.subsection.as_str())),
                created_at,
            }),
            LegacyPayload::Choice(p) => DestinationRow::Choice(ChoiceRow {
                id,
                source_id,
                question_id: ctx.reference("question", EntityType::Question, &p.question)?,
                content: p.content.trim().to_string(),
                order_number: ctx.order_number(&payload, Some(p.question.as_str())),
                created_at,
            }),
            LegacyPayload::Sheet(p) => DestinationRow::Sheet(SheetRow {
                id,
                source_id,
                company_id: ctx.reference("company", EntityType::Company, &p.company)?,
                created_by: ctx.optional_reference("created_by", EntityType::User, p.created_by.as_deref())?,
                name: p.name.clone().unwrap_or_else(|| DEFAULT_SHEET_NAME.to_string()),
                created_at,
            }),
            LegacyPayload::Answer(p) => DestinationRow::Answer(AnswerRow {
                id,
                source_id,
                sheet_id: ctx.reference("sheet", EntityType::Sheet, &p.sheet)?,
                question_id: ctx.reference("question", EntityType::Question, &p.question)?,
                choice_id: ctx.optional_reference("choice", EntityType::Choice, p.choice.as_deref())?,
                value: p.value_text(),
                created_at,
            }),
        };
        Ok(Transformed::Row(row))
    }
}
