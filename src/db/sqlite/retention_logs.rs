use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::RetentionLogRepo,
    },
    models::{CreateRetentionLog, RetentionEntityType, RetentionLog},
};

pub struct SqliteRetentionLogRepo {
    pool: SqlitePool,
}

impl SqliteRetentionLogRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_row(row: &SqliteRow) -> DbResult<RetentionLog> {
        let metadata: String = row.get("metadata");
        Ok(RetentionLog {
            id: parse_uuid(&row.get::<String, _>("id"))?,
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
            metadata: serde_json::from_str(&metadata)?,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl RetentionLogRepo for SqliteRetentionLogRepo {
    async fn create(&self, input: CreateRetentionLog) -> DbResult<RetentionLog> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let metadata_json = serde_json::to_string(&input.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO retention_logs (
                id, executor_id, entity_type, action,
                records_deleted, cutoff_date, metadata, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&input.executor_id)
        .bind(input.entity_type.as_str())
        .bind(input.action.to_string())
        .bind(input.records_deleted)
        .bind(input.cutoff_date)
        .bind(&metadata_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(RetentionLog {
            id,
            executor_id: input.executor_id,
            entity_type: input.entity_type,
            action: input.action,
            records_deleted: input.records_deleted,
            cutoff_date: input.cutoff_date,
            metadata: input.metadata,
            created_at: now,
        })
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
            WHERE entity_type = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(entity_type.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_row).collect()
    }
}
