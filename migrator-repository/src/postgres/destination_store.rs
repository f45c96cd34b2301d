use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migrator_shared::types::{DestinationRow, EntityType, ForeignKey, GroupMember, OrphanRow};
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::errors::DestinationStoreError;
use crate::interfaces::{CascadeDelete, CascadeDeleted, DestinationStore, UpsertedRow};

/// PostgreSQL implementation of the destination store.
///
/// Table and column names are never taken from callers: every identifier
/// spliced into SQL comes from the static schema metadata on [`EntityType`].
pub struct PostgresDestinationStore {
    pool: sqlx::PgPool,
}

/// Insert column list of each destination table, in bind order.
fn columns(entity: EntityType) -> &'static [&'static str] {
    match entity {
        EntityType::Company => &["id", "source_id", "name", "created_at"],
        EntityType::User => &["id", "source_id", "email", "name", "company_id", "created_at"],
        EntityType::Section => &["id", "source_id", "name", "order_number", "created_at"],
        EntityType::Subsection => &[
            "id",
            "source_id",
            "section_id",
            "name",
            "order_number",
            "created_at",
        ],
        EntityType::Question => &[
            "id",
            "source_id",
            "subsection_id",
            "content",
            "question_type",
            "order_number",
            "created_at",
        ],
        EntityType::Choice => &[
            "id",
            "source_id",
            "question_id",
            "content",
            "order_number",
            "created_at",
        ],
        EntityType::Sheet => &["id", "source_id", "company_id", "created_by", "name", "created_at"],
        EntityType::Answer => &[
            "id",
            "source_id",
            "sheet_id",
            "question_id",
            "choice_id",
            "value",
            "created_at",
        ],
    }
}

fn foreign_key(entity: EntityType, column: &str) -> Result<&'static ForeignKey, DestinationStoreError> {
    entity
        .foreign_keys()
        .iter()
        .find(|fk| fk.column == column)
        .ok_or_else(|| DestinationStoreError::unsupported(entity, format!("no column {column}")))
}

fn upsert_statement(entity: EntityType, rows: &[DestinationRow]) -> QueryBuilder<'_, Postgres> {
    let cols = columns(entity);
    let mut query_builder = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        entity.table_name(),
        cols.join(", ")
    ));

    query_builder.push_values(rows, |mut b, row| match row {
        DestinationRow::Company(r) => {
            b.push_bind(r.id)
                .push_bind(r.source_id.clone())
                .push_bind(r.name.clone())
                .push_bind(r.created_at);
        }
        DestinationRow::User(r) => {
            b.push_bind(r.id)
                .push_bind(r.source_id.clone())
                .push_bind(r.email.clone())
                .push_bind(r.name.clone())
                .push_bind(r.company_id)
                .push_bind(r.created_at);
        }
        DestinationRow::Section(r) => {
            b.push_bind(r.id)
                .push_bind(r.source_id.clone())
                .push_bind(r.name.clone())
                .push_bind(r.order_number)
                .push_bind(r.created_at);
        }
        DestinationRow::Subsection(r) => {
            b.push_bind(r.id)
                .push_bind(r.source_id.clone())
                .push_bind(r.section_id)
                .push_bind(r.name.clone())
                .push_bind(r.order_number)
                .push_bind(r.created_at);
        }
        DestinationRow::Question(r) => {
            b.push_bind(r.id)
                .push_bind(r.source_id.clone())
                .push_bind(r.subsection_id)
                .push_bind(r.content.clone())
                .push_bind(r.question_type.clone())
                .push_bind(r.order_number)
                .push_bind(r.created_at);
        }
        DestinationRow::Choice(r) => {
            b.push_bind(r.id)
                .push_bind(r.source_id.clone())
                .push_bind(r.question_id)
                .push_bind(r.content.clone())
                .push_bind(r.order_number)
                .push_bind(r.created_at);
        }
        DestinationRow::Sheet(r) => {
            b.push_bind(r.id)
                .push_bind(r.source_id.clone())
                .push_bind(r.company_id)
                .push_bind(r.created_by)
                .push_bind(r.name.clone())
                .push_bind(r.created_at);
        }
        DestinationRow::Answer(r) => {
            b.push_bind(r.id)
                .push_bind(r.source_id.clone())
                .push_bind(r.sheet_id)
                .push_bind(r.question_id)
                .push_bind(r.choice_id)
                .push_bind(r.value.clone())
                .push_bind(r.created_at);
        }
    });

    // The existing id is kept on conflict; RETURNING reports it. A missing
    // order number never clears a stored one.
    let table = entity.table_name();
    let updates = cols
        .iter()
        .filter(|col| !matches!(**col, "id" | "source_id"))
        .map(|col| match *col {
            "order_number" => format!("{col} = COALESCE(EXCLUDED.{col}, {table}.{col})"),
            _ => format!("{col} = EXCLUDED.{col}"),
        })
        .collect::<Vec<_>>()
        .join(", ");
    query_builder.push(format!(
        " ON CONFLICT (source_id) DO UPDATE SET {updates} RETURNING id, source_id"
    ));
    query_builder
}

async fn clear_in(
    conn: &mut PgConnection,
    entity: EntityType,
    column: &str,
    parent_ids: &[Uuid],
) -> Result<u64, DestinationStoreError> {
    let fk = foreign_key(entity, column)?;
    if fk.required {
        return Err(DestinationStoreError::unsupported(
            entity,
            format!("{column} is required and cannot be cleared"),
        ));
    }
    if parent_ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(&format!(
        "UPDATE {table} SET {col} = NULL WHERE {col} = ANY($1)",
        table = entity.table_name(),
        col = fk.column
    ))
    .bind(parent_ids)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

async fn delete_in(conn: &mut PgConnection, entity: EntityType, ids: &[Uuid]) -> Result<u64, DestinationStoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ANY($1)", entity.table_name()))
        .bind(ids)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

impl PostgresDestinationStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, DestinationStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Applies the bundled schema migrations.
    pub async fn run_migrations(&self) -> Result<(), DestinationStoreError> {
        sqlx::migrate!("src/postgres/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DestinationStoreError::Database(e.to_string()))
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

#[async_trait]
impl DestinationStore for PostgresDestinationStore {
    async fn ping(&self) -> Result<(), DestinationStoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self, rows), fields(entity = %entity, rows = rows.len()))]
    async fn upsert_rows(
        &self,
        entity: EntityType,
        rows: &[DestinationRow],
    ) -> Result<Vec<UpsertedRow>, DestinationStoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(row) = rows.iter().find(|row| row.entity_type() != entity) {
            return Err(DestinationStoreError::unsupported(
                entity,
                format!("cannot write a {} row into {}", row.entity_type(), entity.table_name()),
            ));
        }

        let returned = upsert_statement(entity, rows)
            .build()
            .fetch_all(&self.pool)
            .await?;

        let upserted = returned
            .iter()
            .map(|row| {
                Ok(UpsertedRow {
                    id: row.try_get("id")?,
                    source_id: row.try_get("source_id")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        debug!(written = upserted.len(), "Upserted rows");
        Ok(upserted)
    }

    async fn load_source_mappings(
        &self,
        entity: EntityType,
    ) -> Result<Vec<(String, Uuid)>, DestinationStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT source_id, id FROM {} WHERE source_id IS NOT NULL",
            entity.table_name()
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("source_id")?, row.try_get("id")?)))
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(Into::into)
    }

    async fn count_rows(&self, entity: EntityType) -> Result<u64, DestinationStoreError> {
        let count: i64 = sqlx::query(&format!("SELECT COUNT(*) AS count FROM {}", entity.table_name()))
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;
        Ok(count.max(0) as u64)
    }

    async fn find_orphans(&self, entity: EntityType) -> Result<Vec<OrphanRow>, DestinationStoreError> {
        let mut orphans = Vec::new();
        for fk in entity.foreign_keys() {
            let sql = format!(
                "SELECT c.id, c.source_id, c.{col} AS missing_parent \
                 FROM {table} c LEFT JOIN {parent} p ON p.id = c.{col} \
                 WHERE c.{col} IS NOT NULL AND p.id IS NULL \
                 ORDER BY c.created_at, c.id",
                col = fk.column,
                table = entity.table_name(),
                parent = fk.references.table_name(),
            );
            let rows: Vec<PgRow> = sqlx::query(&sql).fetch_all(&self.pool).await?;
            for row in rows {
                orphans.push(OrphanRow {
                    entity,
                    id: row.try_get("id")?,
                    source_id: row.try_get("source_id")?,
                    column: fk.column,
                    missing_parent: row.try_get("missing_parent")?,
                });
            }
        }
        Ok(orphans)
    }

    async fn group_members(&self, entity: EntityType) -> Result<Vec<GroupMember>, DestinationStoreError> {
        let Some(content) = entity.content_column().filter(|_| entity.is_ordered()) else {
            return Err(DestinationStoreError::unsupported(entity, "not an ordered entity"));
        };
        let parent = entity
            .ordering_parent()
            .map_or("NULL::uuid", |fk| fk.column);
        let sql = format!(
            "SELECT id, {parent} AS parent_id, order_number, {content} AS content, created_at FROM {table}",
            table = entity.table_name(),
        );

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(GroupMember {
                    id: row.try_get("id")?,
                    parent_id: row.try_get("parent_id")?,
                    order_number: row.try_get("order_number")?,
                    content: row.try_get("content")?,
                    created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(Into::into)
    }

    async fn find_referencing_ids(
        &self,
        entity: EntityType,
        column: &str,
        parent_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, DestinationStoreError> {
        let fk = foreign_key(entity, column)?;
        if parent_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT id FROM {} WHERE {} = ANY($1)",
            entity.table_name(),
            fk.column
        ))
        .bind(parent_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("id"))
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(Into::into)
    }

    async fn clear_references(
        &self,
        entity: EntityType,
        column: &str,
        parent_ids: &[Uuid],
    ) -> Result<u64, DestinationStoreError> {
        let mut conn = self.pool.acquire().await?;
        clear_in(&mut *conn, entity, column, parent_ids).await
    }

    async fn delete_rows(&self, entity: EntityType, ids: &[Uuid]) -> Result<u64, DestinationStoreError> {
        let mut conn = self.pool.acquire().await?;
        delete_in(&mut *conn, entity, ids).await
    }

    #[instrument(skip(self, plan), fields(clears = plan.clear.len(), deletes = plan.delete.len()))]
    async fn delete_cascade(&self, plan: &CascadeDelete) -> Result<CascadeDeleted, DestinationStoreError> {
        let mut outcome = CascadeDeleted::default();
        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.pool.begin().await?;
        for (entity, column, parent_ids) in &plan.clear {
            outcome.cleared_references += clear_in(&mut *tx, *entity, column, parent_ids).await?;
        }
        for (entity, ids) in &plan.delete {
            let deleted = delete_in(&mut *tx, *entity, ids).await?;
            outcome.deleted.push((*entity, deleted));
        }
        tx.commit().await?;
        Ok(outcome)
    }

    async fn update_order_numbers(
        &self,
        entity: EntityType,
        updates: &[(Uuid, i32)],
    ) -> Result<(), DestinationStoreError> {
        if !entity.is_ordered() {
            return Err(DestinationStoreError::unsupported(entity, "not an ordered entity"));
        }
        if updates.is_empty() {
            return Ok(());
        }
        let (ids, positions): (Vec<Uuid>, Vec<i32>) = updates.iter().copied().unzip();

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "UPDATE {} AS t SET order_number = u.order_number \
             FROM UNNEST($1::uuid[], $2::int4[]) AS u(id, order_number) \
             WHERE t.id = u.id",
            entity.table_name()
        ))
        .bind(&ids)
        .bind(&positions)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrator_shared::types::{CompanyRow, SectionRow};

    #[test]
    fn upsert_keeps_id_and_source_id_out_of_the_update_set() {
        let rows = vec![DestinationRow::Company(CompanyRow {
            id: Uuid::nil(),
            source_id: Some("c-1".to_string()),
            name: "Acme".to_string(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        })];
        let builder = upsert_statement(EntityType::Company, &rows);
        let sql = builder.sql();

        assert!(sql.starts_with("INSERT INTO companies (id, source_id, name, created_at) VALUES ($1, $2, $3, $4)"));
        assert!(sql.ends_with(
            "ON CONFLICT (source_id) DO UPDATE SET name = EXCLUDED.name, created_at = EXCLUDED.created_at RETURNING id, source_id"
        ));
    }

    #[test]
    fn upsert_keeps_stored_order_numbers_when_none_is_given() {
        let rows = vec![DestinationRow::Section(SectionRow {
            id: Uuid::nil(),
            source_id: Some("s-1".to_string()),
            name: "Storage".to_string(),
            order_number: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        })];
        let builder = upsert_statement(EntityType::Section, &rows);

        assert!(builder
            .sql()
            .contains("order_number = COALESCE(EXCLUDED.order_number, sections.order_number)"));
    }

    #[test]
    fn unknown_columns_are_refused() {
        assert!(foreign_key(EntityType::Answer, "choice_id").is_ok());
        assert!(foreign_key(EntityType::Answer, "id; DROP TABLE answers").is_err());
    }
}
