mod destination_row;
mod entity_type;
mod legacy_payload;
mod legacy_record;
mod reconciliation;

pub use destination_row::{
    AnswerRow, ChoiceRow, CompanyRow, DestinationRow, ForeignKeyValue, QuestionRow, SectionRow,
    SheetRow, SubsectionRow, UserRow,
};
pub use entity_type::{EntityType, ForeignKey, ParseEntityTypeError};
pub use legacy_payload::{
    LegacyAnswer, LegacyChoice, LegacyCompany, LegacyPayload, LegacyQuestion, LegacySection,
    LegacySheet, LegacySubsection, LegacyUser, PayloadError,
};
pub use legacy_record::{LegacyPage, LegacyRecord, CREATED_DATE_FIELD, SOURCE_ID_FIELD};
pub use reconciliation::{
    normalize_content, DuplicateGroup, EntityReport, GroupMember, OrderingViolation,
    OrderingViolationKind, OrphanRow, ReconciliationReport,
};
