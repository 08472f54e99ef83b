use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Row, SqlitePool};

use crate::{
    db::{
        error::DbResult,
        repos::{ReadFrom, RetentionRepo},
    },
    models::{DatabaseStats, RetentionTable, TableStats},
};

/// Statement set for one retention table.
///
/// Id lists are bound as a single JSON array and expanded with `json_each`.
struct TableQueries {
    historical: &'static str,
    snapshot: &'static str,
    fetch: &'static str,
    delete: &'static str,
}

macro_rules! table_queries {
    ($table:literal, $json_fields:literal) => {
        TableQueries {
            historical: concat!(
                "SELECT id FROM (",
                "SELECT id, created_at, ROW_NUMBER() OVER (",
                "PARTITION BY user_id ORDER BY created_at DESC, id DESC",
                ") AS recency FROM ",
                $table,
                ") WHERE recency > 1 AND created_at < ? ",
                "ORDER BY created_at ASC, id ASC"
            ),
            snapshot: concat!(
                "SELECT id FROM ",
                $table,
                " WHERE created_at < ? ORDER BY created_at ASC, id ASC"
            ),
            fetch: concat!(
                "SELECT json_object(",
                $json_fields,
                ") AS record FROM ",
                $table,
                " WHERE id IN (SELECT value FROM json_each(?)) ",
                "ORDER BY created_at ASC, id ASC"
            ),
            delete: concat!(
                "DELETE FROM ",
                $table,
                " WHERE id IN (SELECT value FROM json_each(?))"
            ),
        }
    };
}

static FINANCIAL_CHECKUPS: TableQueries = table_queries!(
    "financial_checkups",
    "'id', id, 'user_id', user_id, 'score', score, 'net_worth', net_worth, \
     'monthly_income', monthly_income, 'monthly_expenses', monthly_expenses, \
     'notes', notes, 'created_at', created_at"
);

static BUDGETS: TableQueries = table_queries!(
    "budgets",
    "'id', id, 'user_id', user_id, 'name', name, 'period_start', period_start, \
     'planned_amount', planned_amount, 'spent_amount', spent_amount, \
     'currency', currency, 'created_at', created_at"
);

static GOALS: TableQueries = table_queries!(
    "goals",
    "'id', id, 'user_id', user_id, 'title', title, 'target_amount', target_amount, \
     'current_amount', current_amount, 'target_date', target_date, \
     'status', status, 'created_at', created_at"
);

static PENSION_SNAPSHOTS: TableQueries = table_queries!(
    "pension_snapshots",
    "'id', id, 'user_id', user_id, 'provider', provider, 'balance', balance, \
     'monthly_contribution', monthly_contribution, \
     'projected_monthly_income', projected_monthly_income, 'created_at', created_at"
);

static INSURANCE_SNAPSHOTS: TableQueries = table_queries!(
    "insurance_snapshots",
    "'id', id, 'user_id', user_id, 'policy_type', policy_type, 'provider', provider, \
     'coverage_amount', coverage_amount, 'monthly_premium', monthly_premium, \
     'created_at', created_at"
);

fn queries(table: RetentionTable) -> &'static TableQueries {
    match table {
        RetentionTable::FinancialCheckups => &FINANCIAL_CHECKUPS,
        RetentionTable::Budgets => &BUDGETS,
        RetentionTable::Goals => &GOALS,
        RetentionTable::PensionSnapshots => &PENSION_SNAPSHOTS,
        RetentionTable::InsuranceSnapshots => &INSURANCE_SNAPSHOTS,
    }
}

pub struct SqliteRetentionRepo {
    pool: SqlitePool,
}

impl SqliteRetentionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn candidate_ids(
        &self,
        sql: &'static str,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<String>> {
        let rows = sqlx::query(sql).bind(cutoff).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("id")).collect())
    }

    /// Row estimates from `sqlite_stat1`, keyed by table name.
    ///
    /// The first integer of `stat` is the row count. The table only exists
    /// after `ANALYZE` has run.
    async fn analyzed_row_counts(&self) -> DbResult<Vec<(String, i64)>> {
        let has_stat1: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_stat1'",
        )
        .fetch_one(&self.pool)
        .await?;
        if has_stat1 == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT tbl, stat FROM sqlite_stat1")
            .fetch_all(&self.pool)
            .await?;

        let mut counts: Vec<(String, i64)> = Vec::new();
        for row in rows {
            let tbl: String = row.get("tbl");
            let stat: String = row.get("stat");
            let estimate = stat
                .split_whitespace()
                .next()
                .and_then(|n| n.parse::<i64>().ok())
                .unwrap_or(0);
            match counts.iter_mut().find(|(name, _)| *name == tbl) {
                Some((_, count)) => *count = (*count).max(estimate),
                None => counts.push((tbl, estimate)),
            }
        }
        Ok(counts)
    }

    /// Table and index byte sizes from the `dbstat` virtual table, if compiled in.
    async fn dbstat_sizes(&self, table: &str) -> Option<(i64, i64)> {
        let table_bytes = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(pgsize), 0) FROM dbstat WHERE name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await;

        let table_bytes = match table_bytes {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(error = %e, "dbstat unavailable, reporting zero sizes");
                return None;
            }
        };

        let index_bytes = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(d.pgsize), 0)
            FROM dbstat d
            JOIN sqlite_master m ON m.name = d.name
            WHERE m.type = 'index' AND m.tbl_name = ?
            "#,
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .ok()?;

        Some((table_bytes, index_bytes))
    }
}

#[async_trait]
impl RetentionRepo for SqliteRetentionRepo {
    async fn historical_candidates(
        &self,
        table: RetentionTable,
        cutoff: DateTime<Utc>,
        _read_from: ReadFrom,
    ) -> DbResult<Vec<String>> {
        self.candidate_ids(queries(table).historical, cutoff).await
    }

    async fn snapshot_candidates(
        &self,
        table: RetentionTable,
        cutoff: DateTime<Utc>,
        _read_from: ReadFrom,
    ) -> DbResult<Vec<String>> {
        self.candidate_ids(queries(table).snapshot, cutoff).await
    }

    async fn fetch_records(
        &self,
        table: RetentionTable,
        ids: &[String],
    ) -> DbResult<Vec<JsonValue>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids_json = serde_json::to_string(ids)?;
        let rows = sqlx::query(queries(table).fetch)
            .bind(ids_json)
            .fetch_all(&self.pool)
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

        let ids_json = serde_json::to_string(ids)?;
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(queries(table).delete)
            .bind(ids_json)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected())
    }

    async fn table_stats(&self) -> DbResult<DatabaseStats> {
        let row_counts = self.analyzed_row_counts().await?;

        let mut tables = Vec::with_capacity(RetentionTable::ALL.len());
        for table in RetentionTable::ALL {
            let name = table.name();
            let row_count = row_counts
                .iter()
                .find(|(tbl, _)| tbl == name)
                .map(|(_, count)| *count)
                .unwrap_or(0);
            let (table_bytes, index_bytes) = self.dbstat_sizes(name).await.unwrap_or((0, 0));

            tables.push(TableStats {
                table_name: name.to_string(),
                row_count: row_count.max(0),
                total_bytes: (table_bytes + index_bytes).max(0),
                index_bytes: index_bytes.max(0),
            });
        }

        let total_database_bytes: i64 = sqlx::query_scalar(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DatabaseStats {
            tables,
            total_database_bytes: total_database_bytes.max(0),
        })
    }
}
