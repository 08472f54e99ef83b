use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::RetentionLogRepo,
    },
    models::{CreateRetentionLog, RetentionEntityType, RetentionLog},
};

pub struct PostgresRetentionLogRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresRetentionLogRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn parse_row(row: &PgRow) -> DbResult<RetentionLog> {
        Ok(RetentionLog {
            id: row.get("id"),
            executor_id: row.get("executor_id"),
            entity_type: row
                .get::<String, _>("entity_type")
                .parse()
                .map_err(DbError::Internal)?,
            action: row
                .get::<String, _>("action")
                .parse()
                .map_err(DbError::Internal)?,
            records_deleted: row.get("records_deleted"),
            cutoff_date: row.get("cutoff_date"),
            metadata: row.get("metadata"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl RetentionLogRepo for PostgresRetentionLogRepo {
    async fn create(&self, input: CreateRetentionLog) -> DbResult<RetentionLog> {
        let row = sqlx::query(
            r#"
            INSERT INTO retention_logs (
                id, executor_id, entity_type, action,
                records_deleted, cutoff_date, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, executor_id, entity_type, action,
                      records_deleted, cutoff_date, metadata, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.executor_id)
        .bind(input.entity_type.as_str())
        .bind(input.action.to_string())
        .bind(input.records_deleted)
        .bind(input.cutoff_date)
        .bind(&input.metadata)
        .bind(chrono::Utc::now())
        .fetch_one(&self.write_pool)
        .await?;

        Self::parse_row(&row)
    }

    async fn list_by_entity(
        &self,
        entity_type: RetentionEntityType,
        limit: i64,
    ) -> DbResult<Vec<RetentionLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, executor_id, entity_type, action,
                   records_deleted, cutoff_date, metadata, created_at
            FROM retention_logs
            WHERE entity_type = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(entity_type.as_str())
        .bind(limit)
        .fetch_all(&self.read_pool)
        .await?;

        rows.iter().map(Self::parse_row).collect()
    }
}
