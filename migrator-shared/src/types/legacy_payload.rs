//! Typed views of legacy records, one per entity type.
//!
//! The Data API returns loosely-typed objects. Parsing them into these structs
//! is where required fields are enforced; fields not named here are dropped.
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{de, Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use super::{EntityType, LegacyRecord};

/// Why a legacy record could not be parsed into its typed payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

/// Blank or null dates are absent; anything else must be a timestamp.
fn blank_date_as_none<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match blank_as_none(deserializer)? {
        Some(s) => s.parse::<DateTime<Utc>>().map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}

/// Child lists may be sent as `null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

fn require(field: &'static str, value: &str) -> Result<(), PayloadError> {
    if value.trim().is_empty() {
        return Err(PayloadError::MissingField(field));
    }
    Ok(())
}

/// Converts the platform's floating point numbers into a 1-based position.
fn position(order: Option<f64>) -> Option<i32> {
    order
        .filter(|o| o.fract() == 0.0 && *o >= 1.0 && *o <= i32::MAX as f64)
        .map(|o| o as i32)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacyCompany {
    pub name: String,
    #[serde(rename = "Created Date", default, deserialize_with = "blank_date_as_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacyUser {
    pub email: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub company: Option<String>,
    #[serde(rename = "Created Date", default, deserialize_with = "blank_date_as_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacySection {
    pub name: String,
    #[serde(default)]
    pub order: Option<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub subsections: Vec<String>,
    #[serde(rename = "Created Date", default, deserialize_with = "blank_date_as_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacySubsection {
    pub name: String,
    pub section: String,
    #[serde(default)]
    pub order: Option<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub questions: Vec<String>,
    #[serde(rename = "Created Date", default, deserialize_with = "blank_date_as_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacyQuestion {
    pub content: String,
    pub subsection: String,
    #[serde(default)]
    pub order: Option<f64>,
    #[serde(rename = "type", default, deserialize_with = "blank_as_none")]
    pub question_type: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub choices: Vec<String>,
    #[serde(rename = "Created Date", default, deserialize_with = "blank_date_as_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacyChoice {
    pub content: String,
    pub question: String,
    #[serde(default)]
    pub order: Option<f64>,
    #[serde(rename = "Created Date", default, deserialize_with = "blank_date_as_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacySheet {
    pub company: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub created_by: Option<String>,
    #[serde(rename = "Created Date", default, deserialize_with = "blank_date_as_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacyAnswer {
    pub sheet: String,
    pub question: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub choice: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(rename = "Created Date", default, deserialize_with = "blank_date_as_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl LegacyAnswer {
    /// Free-text value of the answer; scalars are rendered as text.
    pub fn value_text(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Tagged union over the typed legacy records.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyPayload {
    Company(LegacyCompany),
    User(LegacyUser),
    Section(LegacySection),
    Subsection(LegacySubsection),
    Question(LegacyQuestion),
    Choice(LegacyChoice),
    Sheet(LegacySheet),
    Answer(LegacyAnswer),
}

fn decode<T: DeserializeOwned>(record: &LegacyRecord) -> Result<T, PayloadError> {
    serde_json::from_value(Value::Object(record.fields.clone()))
        .map_err(|e| PayloadError::Malformed(e.to_string()))
}

impl LegacyPayload {
    /// Parses and validates a raw record according to its entity type.
    pub fn parse(record: &LegacyRecord) -> Result<Self, PayloadError> {
        let payload = match record.entity_type {
            EntityType::Company => {
                let company: LegacyCompany = decode(record)?;
                require("name", &company.name)?;
                LegacyPayload::Company(company)
            }
            EntityType::User => {
                let user: LegacyUser = decode(record)?;
                require("email", &user.email)?;
                LegacyPayload::User(user)
            }
            EntityType::Section => {
                let section: LegacySection = decode(record)?;
                require("name", &section.name)?;
                LegacyPayload::Section(section)
            }
            EntityType::Subsection => {
                let subsection: LegacySubsection = decode(record)?;
                require("name", &subsection.name)?;
                require("section", &subsection.section)?;
                LegacyPayload::Subsection(subsection)
            }
            EntityType::Question => {
                let question: LegacyQuestion = decode(record)?;
                require("content", &question.content)?;
                require("subsection", &question.subsection)?;
                LegacyPayload::Question(question)
            }
            EntityType::Choice => {
                let choice: LegacyChoice = decode(record)?;
                require("content", &choice.content)?;
                require("question", &choice.question)?;
                LegacyPayload::Choice(choice)
            }
            EntityType::Sheet => {
                let sheet: LegacySheet = decode(record)?;
                require("company", &sheet.company)?;
                LegacyPayload::Sheet(sheet)
            }
            EntityType::Answer => {
                let answer: LegacyAnswer = decode(record)?;
                require("sheet", &answer.sheet)?;
                require("question", &answer.question)?;
                LegacyPayload::Answer(answer)
            }
        };
        Ok(payload)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match self {
            LegacyPayload::Company(p) => p.created_at,
            LegacyPayload::User(p) => p.created_at,
            LegacyPayload::Section(p) => p.created_at,
            LegacyPayload::Subsection(p) => p.created_at,
            LegacyPayload::Question(p) => p.created_at,
            LegacyPayload::Choice(p) => p.created_at,
            LegacyPayload::Sheet(p) => p.created_at,
            LegacyPayload::Answer(p) => p.created_at,
        }
    }

    /// Explicit 1-based position carried by the record itself, if any.
    pub fn order_number(&self) -> Option<i32> {
        match self {
            LegacyPayload::Section(p) => position(p.order),
            LegacyPayload::Subsection(p) => position(p.order),
            LegacyPayload::Question(p) => position(p.order),
            LegacyPayload::Choice(p) => position(p.order),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(entity_type: EntityType, value: Value) -> LegacyRecord {
        match value {
            Value::Object(fields) => LegacyRecord::new(entity_type, "src-1", fields),
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn parses_question_with_optional_fields() {
        let rec = record(
            EntityType::Question,
            json!({
                "content": "Do you store biocides?",
                "subsection": "sub-1",
                "order": 3.0,
                "choices": ["c-1", "c-2"],
                "Created Date": "2023-04-01T10:00:00.000Z",
                "Modified Date": "2023-04-02T10:00:00.000Z"
            }),
        );
        let LegacyPayload::Question(question) = LegacyPayload::parse(&rec).unwrap() else {
            panic!("expected a question payload");
        };
        assert_eq!(question.subsection, "sub-1");
        assert_eq!(question.choices, vec!["c-1", "c-2"]);
        assert_eq!(LegacyPayload::Question(question).order_number(), Some(3));
    }

    #[test]
    fn missing_required_parent_is_rejected() {
        let rec = record(EntityType::Choice, json!({ "content": "Yes" }));
        assert!(matches!(
            LegacyPayload::parse(&rec),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn blank_required_field_is_reported_by_name() {
        let rec = record(EntityType::Company, json!({ "name": "   " }));
        assert_eq!(
            LegacyPayload::parse(&rec),
            Err(PayloadError::MissingField("name"))
        );
    }

    #[test]
    fn fractional_or_zero_order_is_ignored() {
        let zero = record(EntityType::Section, json!({ "name": "A", "order": 0 }));
        let frac = record(EntityType::Section, json!({ "name": "B", "order": 1.5 }));
        assert_eq!(LegacyPayload::parse(&zero).unwrap().order_number(), None);
        assert_eq!(LegacyPayload::parse(&frac).unwrap().order_number(), None);
    }

    #[test]
    fn blank_created_date_is_absent() {
        let rec = record(EntityType::Company, json!({ "name": "Acme", "Created Date": "" }));
        assert_eq!(LegacyPayload::parse(&rec).unwrap().created_at(), None);

        let bad = record(EntityType::Company, json!({ "name": "Acme", "Created Date": "yesterday" }));
        assert!(matches!(LegacyPayload::parse(&bad), Err(PayloadError::Malformed(_))));
    }

    #[test]
    fn null_child_list_is_empty() {
        let rec = record(
            EntityType::Question,
            json!({ "content": "Q", "subsection": "s", "choices": null }),
        );
        let LegacyPayload::Question(question) = LegacyPayload::parse(&rec).unwrap() else {
            panic!("expected a question payload");
        };
        assert!(question.choices.is_empty());
    }

    #[test]
    fn answer_value_renders_scalars() {
        let rec = record(
            EntityType::Answer,
            json!({ "sheet": "s-1", "question": "q-1", "value": 42 }),
        );
        let LegacyPayload::Answer(answer) = LegacyPayload::parse(&rec).unwrap() else {
            panic!("expected an answer payload");
        };
        assert_eq!(answer.value_text().as_deref(), Some("42"));
    }
}
