use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};

use crate::{
    db::{
        error::DbResult,
        repos::{ReadFrom, RetentionRepo},
    },
    models::{DatabaseStats, RetentionTable, TableStats},
};

/// Statement set for one retention table.
///
/// Id lists are bound as `text[]` and cast to `uuid[]` server-side.
struct TableQueries {
    historical: &'static str,
    snapshot: &'static str,
    fetch: &'static str,
    delete: &'static str,
}

macro_rules! table_queries {
    ($table:literal) => {
        TableQueries {
            historical: concat!(
                "SELECT id::text AS id FROM (",
                "SELECT id, created_at, ROW_NUMBER() OVER (",
                "PARTITION BY user_id ORDER BY created_at DESC, id DESC",
                ") AS recency FROM ",
                $table,
                ") ranked WHERE recency > 1 AND created_at < $1 ",
                "ORDER BY created_at ASC, id ASC"
            ),
            snapshot: concat!(
                "SELECT id::text AS id FROM ",
                $table,
                " WHERE created_at < $1 ORDER BY created_at ASC, id ASC"
            ),
            fetch: concat!(
                "SELECT row_to_json(t)::text AS record FROM ",
                $table,
                " t WHERE t.id = ANY($1::text[]::uuid[]) ",
                "ORDER BY t.created_at ASC, t.id ASC"
            ),
            delete: concat!(
                "DELETE FROM ",
                $table,
                " WHERE id = ANY($1::text[]::uuid[])"
            ),
        }
    };
}

static FINANCIAL_CHECKUPS: TableQueries = table_queries!("financial_checkups");
static BUDGETS: TableQueries = table_queries!("budgets");
static GOALS: TableQueries = table_queries!("goals");
static PENSION_SNAPSHOTS: TableQueries = table_queries!("pension_snapshots");
static INSURANCE_SNAPSHOTS: TableQueries = table_queries!("insurance_snapshots");

fn queries(table: RetentionTable) -> &'static TableQueries {
    match table {
        RetentionTable::FinancialCheckups => &FINANCIAL_CHECKUPS,
        RetentionTable::Budgets => &BUDGETS,
        RetentionTable::Goals => &GOALS,
        RetentionTable::PensionSnapshots => &PENSION_SNAPSHOTS,
        RetentionTable::InsuranceSnapshots => &INSURANCE_SNAPSHOTS,
    }
}

/// Export candidates, fetch and stats queries go to the read pool. Prune
/// candidates and deletes always go to the primary.
pub struct PostgresRetentionRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresRetentionRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn pool(&self, read_from: ReadFrom) -> &PgPool {
        match read_from {
            ReadFrom::Replica => &self.read_pool,
            ReadFrom::Primary => &self.write_pool,
        }
    }

    async fn candidate_ids(
        &self,
        sql: &'static str,
        cutoff: DateTime<Utc>,
        read_from: ReadFrom,
    ) -> DbResult<Vec<String>> {
        let rows = sqlx::query(sql)
            .bind(cutoff)
            .fetch_all(self.pool(read_from))
            .await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("id")).collect())
    }
}

#[async_trait]
impl RetentionRepo for PostgresRetentionRepo {
    async fn historical_candidates(
        &self,
        table: RetentionTable,
        cutoff: DateTime<Utc>,
        read_from: ReadFrom,
    ) -> DbResult<Vec<String>> {
        self.candidate_ids(queries(table).historical, cutoff, read_from)
            .await
    }

    async fn snapshot_candidates(
        &self,
        table: RetentionTable,
        cutoff: DateTime<Utc>,
        read_from: ReadFrom,
    ) -> DbResult<Vec<String>> {
        self.candidate_ids(queries(table).snapshot, cutoff, read_from)
            .await
    }

    async fn fetch_records(
        &self,
        table: RetentionTable,
        ids: &[String],
    ) -> DbResult<Vec<JsonValue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(queries(table).fetch)
            .bind(ids)
            .fetch_all(&self.read_pool)
            .await?;

        rows.iter()
            .map(|row| -> DbResult<JsonValue> {
                let record: String = row.get("record");
                Ok(serde_json::from_str(&record)?)
            })
            .collect()
    }

    async fn delete_batch(&self, table: RetentionTable, ids: &[String]) -> DbResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.write_pool.begin().await?;
        let result = sqlx::query(queries(table).delete)
            .bind(ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }

    async fn table_stats(&self) -> DbResult<DatabaseStats> {
        let names: Vec<&str> = RetentionTable::ALL.iter().map(|t| t.name()).collect();

        let rows = sqlx::query(
            r#"
            SELECT relname::text AS table_name,
                   n_live_tup::bigint AS row_count,
                   pg_total_relation_size(relid)::bigint AS total_bytes,
                   pg_indexes_size(relid)::bigint AS index_bytes
            FROM pg_stat_user_tables
            WHERE schemaname = current_schema() AND relname = ANY($1)
            "#,
        )
        .bind(names.as_slice())
        .fetch_all(&self.read_pool)
        .await?;

        let tables = RetentionTable::ALL
            .iter()
            .map(|table| {
                let row = rows
                    .iter()
                    .find(|row| row.get::<String, _>("table_name") == table.name());
                match row {
                    Some(row) => TableStats {
                        table_name: table.name().to_string(),
                        row_count: row.get::<i64, _>("row_count").max(0),
                        total_bytes: row.get::<i64, _>("total_bytes").max(0),
                        index_bytes: row.get::<i64, _>("index_bytes").max(0),
                    },
                    None => TableStats {
                        table_name: table.name().to_string(),
                        row_count: 0,
                        total_bytes: 0,
                        index_bytes: 0,
                    },
                }
            })
            .collect();

        let total_database_bytes: i64 =
            sqlx::query_scalar("SELECT pg_database_size(current_database())::bigint")
                .fetch_one(&self.read_pool)
                .await?;

        Ok(DatabaseStats {
            tables,
            total_database_bytes: total_database_bytes.max(0),
        })
    }
}
