use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::{
    db::error::DbResult,
    models::{DatabaseStats, RetentionTable},
};

/// Pool a candidate query runs on.
///
/// Backends without a read replica treat both the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    /// Read replica when configured. Used by exports and stats.
    Replica,
    /// Primary. Used when the ids are about to be deleted, so rows already
    /// removed are never reported again.
    Primary,
}

/// Storage operations behind the retention engine.
///
/// Every method takes a [`RetentionTable`] rather than a table name, so
/// query text is always chosen from a fixed per-table set.
#[async_trait]
pub trait RetentionRepo: Send + Sync {
    /// Ids of rows created before `cutoff` that are not their owner's most
    /// recent row. Ties on `created_at` rank the greatest `id` as most recent.
    ///
    /// Ordered by `(created_at, id)` ascending.
    async fn historical_candidates(
        &self,
        table: RetentionTable,
        cutoff: DateTime<Utc>,
        read_from: ReadFrom,
    ) -> DbResult<Vec<String>>;

    /// Ids of rows created before `cutoff`, ordered by `(created_at, id)` ascending.
    async fn snapshot_candidates(
        &self,
        table: RetentionTable,
        cutoff: DateTime<Utc>,
        read_from: ReadFrom,
    ) -> DbResult<Vec<String>>;

    /// Full rows for `ids` as JSON objects, in `(created_at, id)` order.
    async fn fetch_records(&self, table: RetentionTable, ids: &[String])
    -> DbResult<Vec<JsonValue>>;

    /// Delete `ids` in a single transaction. Returns rows affected.
    async fn delete_batch(&self, table: RetentionTable, ids: &[String]) -> DbResult<u64>;

    /// Engine-reported size metadata for every retention table.
    async fn table_stats(&self) -> DbResult<DatabaseStats>;
}
