use async_trait::async_trait;

use crate::{
    db::error::DbResult,
    models::{CreateRetentionLog, RetentionEntityType, RetentionLog},
};

/// Append-only sink for retention audit entries.
#[async_trait]
pub trait RetentionLogRepo: Send + Sync {
    /// Create a new retention audit entry
    async fn create(&self, input: CreateRetentionLog) -> DbResult<RetentionLog>;

    /// Most recent entries for an entity type, newest first
    async fn list_by_entity(
        &self,
        entity_type: RetentionEntityType,
        limit: i64,
    ) -> DbResult<Vec<RetentionLog>>;
}
