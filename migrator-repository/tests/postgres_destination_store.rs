//! Integration tests for the PostgreSQL destination store.
//!
//! These tests require a real PostgreSQL database and use SQLx test macros
//! to ensure proper test isolation and cleanup.
//!
//! Run with: `DATABASE_URL=postgres://... cargo test --test postgres_destination_store -- --ignored`

use chrono::{DateTime, Utc};
use migrator_repository::{CascadeDelete, DestinationStore, DestinationStoreError, PostgresDestinationStore};
use migrator_shared::types::{CompanyRow, DestinationRow, EntityType, QuestionRow, UserRow};
use sqlx::Row;
use uuid::Uuid;

fn company(source_id: &str, name: &str) -> DestinationRow {
    DestinationRow::Company(CompanyRow {
        id: Uuid::new_v4(),
        source_id: Some(source_id.to_string()),
        name: name.to_string(),
        created_at: DateTime::<Utc>::UNIX_EPOCH,
    })
}

fn user(source_id: &str, email: &str) -> DestinationRow {
    DestinationRow::User(UserRow {
        id: Uuid::new_v4(),
        source_id: Some(source_id.to_string()),
        email: email.to_string(),
        name: None,
        company_id: None,
        created_at: DateTime::<Utc>::UNIX_EPOCH,
    })
}

fn question(subsection_id: Uuid, order_number: Option<i32>) -> DestinationRow {
    DestinationRow::Question(QuestionRow {
        id: Uuid::new_v4(),
        source_id: None,
        subsection_id,
        content: "Do you store biocides?".to_string(),
        question_type: "text".to_string(),
        order_number,
        created_at: DateTime::<Utc>::UNIX_EPOCH,
    })
}

// ============================================================================
// Upserts
// ============================================================================

#[sqlx::test(migrations = "src/postgres/migrations")]
#[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
async fn test_upsert_is_idempotent_on_source_id(pool: sqlx::PgPool) {
    let store = PostgresDestinationStore::new(pool.clone());

    let first = store
        .upsert_rows(EntityType::Company, &[company("c-1", "Acme")])
        .await
        .unwrap();
    let second = store
        .upsert_rows(EntityType::Company, &[company("c-1", "Acme Ltd")])
        .await
        .unwrap();

    assert_eq!(first[0].id, second[0].id);
    let rows = sqlx::query("SELECT id, name FROM companies").fetch_all(&pool).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String, _>("name"), "Acme Ltd");
    assert_eq!(store.count_rows(EntityType::Company).await.unwrap(), 1);
}

#[sqlx::test(migrations = "src/postgres/migrations")]
#[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
async fn test_duplicate_email_is_a_conflict(pool: sqlx::PgPool) {
    let store = PostgresDestinationStore::new(pool);
    store
        .upsert_rows(EntityType::User, &[user("u-1", "ops@acme.test")])
        .await
        .unwrap();

    let result = store
        .upsert_rows(EntityType::User, &[user("u-2", "ops@acme.test")])
        .await;

    assert!(matches!(result, Err(DestinationStoreError::Conflict(_))));
}

#[sqlx::test(migrations = "src/postgres/migrations")]
#[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
async fn test_load_source_mappings(pool: sqlx::PgPool) {
    let store = PostgresDestinationStore::new(pool);
    let written = store
        .upsert_rows(EntityType::Company, &[company("c-1", "Acme"), company("c-2", "Globex")])
        .await
        .unwrap();

    let mut mappings = store.load_source_mappings(EntityType::Company).await.unwrap();
    mappings.sort();
    assert_eq!(mappings.len(), 2);
    assert!(written
        .iter()
        .all(|w| mappings.contains(&(w.source_id.clone().unwrap(), w.id))));
}

// ============================================================================
// Reconciliation queries
// ============================================================================

#[sqlx::test(migrations = "src/postgres/migrations")]
#[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
async fn test_find_orphans_and_delete(pool: sqlx::PgPool) {
    let store = PostgresDestinationStore::new(pool);
    let missing = Uuid::new_v4();
    let orphan = question(missing, Some(1));
    store
        .upsert_rows(EntityType::Question, &[orphan.clone()])
        .await
        .unwrap();

    let orphans = store.find_orphans(EntityType::Question).await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].id, orphan.id());
    assert_eq!(orphans[0].missing_parent, missing);

    let deleted = store
        .delete_rows(EntityType::Question, &[orphan.id()])
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(store.find_orphans(EntityType::Question).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "src/postgres/migrations")]
#[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
async fn test_group_members_and_order_update(pool: sqlx::PgPool) {
    let store = PostgresDestinationStore::new(pool);
    let parent = Uuid::new_v4();
    let rows = vec![question(parent, None), question(parent, Some(4))];
    store.upsert_rows(EntityType::Question, &rows).await.unwrap();

    store
        .update_order_numbers(EntityType::Question, &[(rows[0].id(), 1), (rows[1].id(), 2)])
        .await
        .unwrap();

    let mut members = store.group_members(EntityType::Question).await.unwrap();
    members.sort_by_key(|m| m.order_number);
    assert!(members.iter().all(|m| m.parent_id == Some(parent)));
    assert_eq!(
        members.iter().map(|m| m.order_number).collect::<Vec<_>>(),
        vec![Some(1), Some(2)]
    );
}

#[sqlx::test(migrations = "src/postgres/migrations")]
#[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
async fn test_clear_optional_references(pool: sqlx::PgPool) {
    let store = PostgresDestinationStore::new(pool);
    let company_id = Uuid::new_v4();
    let mut row = user("u-1", "ops@acme.test");
    if let DestinationRow::User(u) = &mut row {
        u.company_id = Some(company_id);
    }
    store.upsert_rows(EntityType::User, &[row]).await.unwrap();

    let referencing = store
        .find_referencing_ids(EntityType::User, "company_id", &[company_id])
        .await
        .unwrap();
    assert_eq!(referencing.len(), 1);

    let cleared = store
        .clear_references(EntityType::User, "company_id", &[company_id])
        .await
        .unwrap();
    assert_eq!(cleared, 1);

    let refused = store
        .clear_references(EntityType::Choice, "question_id", &[Uuid::new_v4()])
        .await;
    assert!(matches!(refused, Err(DestinationStoreError::Unsupported { .. })));
}

#[sqlx::test(migrations = "src/postgres/migrations")]
#[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
async fn test_failed_cascade_rolls_back(pool: sqlx::PgPool) {
    let store = PostgresDestinationStore::new(pool);
    let acme = company("c-1", "Acme");
    let mut ops = user("u-1", "ops@acme.test");
    if let DestinationRow::User(u) = &mut ops {
        u.company_id = Some(acme.id());
    }
    store.upsert_rows(EntityType::Company, &[acme.clone()]).await.unwrap();
    store.upsert_rows(EntityType::User, &[ops]).await.unwrap();

    let plan = CascadeDelete {
        clear: vec![
            (EntityType::User, "company_id", vec![acme.id()]),
            (EntityType::Choice, "question_id", vec![Uuid::new_v4()]),
        ],
        delete: vec![(EntityType::Company, vec![acme.id()])],
    };
    assert!(store.delete_cascade(&plan).await.is_err());
    assert_eq!(store.count_rows(EntityType::Company).await.unwrap(), 1);
    let still_referencing = store
        .find_referencing_ids(EntityType::User, "company_id", &[acme.id()])
        .await
        .unwrap();
    assert_eq!(still_referencing.len(), 1);
}

#[sqlx::test(migrations = "src/postgres/migrations")]
#[ignore = "requires DATABASE_URL pointing at a PostgreSQL server"]
async fn test_upsert_without_order_keeps_the_stored_one(pool: sqlx::PgPool) {
    let store = PostgresDestinationStore::new(pool);
    let subsection_id = Uuid::new_v4();
    let mut ordered = question(subsection_id, Some(2));
    if let DestinationRow::Question(q) = &mut ordered {
        q.source_id = Some("q-1".to_string());
    }
    store.upsert_rows(EntityType::Question, &[ordered.clone()]).await.unwrap();

    let mut unordered = ordered;
    unordered.set_order_number(None);
    store.upsert_rows(EntityType::Question, &[unordered]).await.unwrap();

    let members = store.group_members(EntityType::Question).await.unwrap();
    assert_eq!(members[0].order_number, Some(2));
}
