//! Data retention engine.
//!
//! Deleting financial history is a two-step protocol:
//!
//! 1. **Export.** Candidates for an entity type and cutoff are streamed as a
//!    JSON envelope. The closing footer carries a signed prune token, so only
//!    a client that received the complete document holds the token.
//! 2. **Prune.** The token is checked against the same entity type and
//!    cutoff, candidates are recomputed, and rows are deleted in
//!    independently committed batches. Each run leaves an audit entry.
//!
//! Which rows are candidates depends on the entity type:
//! historical data keeps every owner's most recent row, snapshot data
//! keeps nothing older than the cutoff.

mod dates;
mod error;
mod export;
mod orchestrator;
mod resolver;
mod stats;
mod strategy;
mod token;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

pub use dates::{ensure_before_boundary, normalize_cutoff, safety_boundary};
pub use error::{RetentionError, RetentionResult};
pub use export::{
    ChannelSink, EnvelopeSink, ExportManager, ExportSummary, INTEGRITY_ALGORITHM, PreparedExport,
    SinkClosed,
};
pub use orchestrator::{PruneOutcome, RetentionOrchestrator};
pub use resolver::{ResolvedTarget, resolve, resolve_name};
pub use stats::format_bytes;
pub use strategy::CandidateStrategy;
pub use token::PruneTokenSigner;

use crate::{
    config::RetentionConfig,
    db::{DbPool, RetentionLogRepo, RetentionRepo},
    models::DatabaseStats,
};

/// Export, prune and stats sharing one repository and signing secret.
#[derive(Clone)]
pub struct RetentionEngine {
    repo: Arc<dyn RetentionRepo>,
    exports: ExportManager,
    orchestrator: RetentionOrchestrator,
}

impl RetentionEngine {
    pub fn new(
        repo: Arc<dyn RetentionRepo>,
        logs: Arc<dyn RetentionLogRepo>,
        config: &RetentionConfig,
    ) -> Self {
        let signer = PruneTokenSigner::new(config.signing_secret.as_bytes());
        Self {
            exports: ExportManager::new(repo.clone(), signer.clone(), config.batch_size as usize),
            orchestrator: RetentionOrchestrator::new(repo.clone(), logs, signer, config),
            repo,
        }
    }

    pub fn from_pool(db: &DbPool, config: &RetentionConfig) -> Self {
        Self::new(db.retention(), db.retention_logs(), config)
    }

    pub fn exports(&self) -> &ExportManager {
        &self.exports
    }

    pub fn orchestrator(&self) -> &RetentionOrchestrator {
        &self.orchestrator
    }

    pub async fn stats(&self) -> RetentionResult<DatabaseStats> {
        stats::table_stats(self.repo.as_ref()).await
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use chrono::{Datelike, Months, Utc};
    use serde_json::Value;
    use uuid::Uuid;

    use super::*;
    use crate::{
        db::tests::harness::{RecordSeeder, SqliteSeeder, migrated_sqlite_pool, months_ago, record_id},
        models::{RetentionAction, RetentionEntityType, RetentionTable},
        retention::testing::ClosingSink,
    };

    const SECRET: &str = "0123456789abcdef0123456789abcdef";
    const ELIGIBLE: u128 = 2_500;
    const RECENT: u128 = 10;

    struct Setup {
        engine: RetentionEngine,
        db: DbPool,
        seeder: SqliteSeeder,
    }

    async fn setup() -> Setup {
        let pool = migrated_sqlite_pool().await;
        let db = DbPool::from_sqlite(pool.clone());
        let mut config = RetentionConfig::with_secret(SECRET);
        config.audit_retry_backoff_ms = 0;
        Setup {
            engine: RetentionEngine::from_pool(&db, &config),
            db,
            seeder: SqliteSeeder(pool),
        }
    }

    fn owner(n: u128) -> Uuid {
        record_id(1_000_000 + n % 50)
    }

    /// 2,500 pension snapshots a year old plus ten from today.
    async fn seed_pensions(seeder: &SqliteSeeder) {
        let old = months_ago(12);
        for n in 0..ELIGIBLE {
            seeder
                .insert(RetentionTable::PensionSnapshots, record_id(n), owner(n), old)
                .await;
        }
        for n in 0..RECENT {
            seeder
                .insert(
                    RetentionTable::PensionSnapshots,
                    record_id(10_000 + n),
                    owner(n),
                    Utc::now(),
                )
                .await;
        }
    }

    fn cutoff() -> String {
        let date = Utc::now().date_naive() - Months::new(3);
        format!("{:04}-{:02}-01", date.year(), date.month())
    }

    #[tokio::test]
    async fn test_export_then_prune_end_to_end() {
        let s = setup().await;
        seed_pensions(&s.seeder).await;
        let cutoff = cutoff();

        let mut body = Vec::new();
        let summary = s
            .engine
            .exports()
            .export_stream("PENSION", &cutoff, &mut body)
            .await
            .unwrap();
        assert_eq!(summary.records_written, ELIGIBLE as u64);

        let envelope: Value = serde_json::from_slice(&body).unwrap();
        let records = envelope["records"].as_array().unwrap();
        assert_eq!(records.len(), ELIGIBLE as usize);
        assert_eq!(envelope["metadata"]["totalRecords"], ELIGIBLE as u64);
        assert!(records.iter().all(|r| r["user_id"].is_string()));
        let token = envelope["security"]["pruneToken"].as_str().unwrap();

        let outcome = s
            .engine
            .orchestrator()
            .prune("admin-7", "PENSION", &cutoff, token)
            .await
            .unwrap();
        assert_eq!(outcome.deleted_count, ELIGIBLE as u64);

        assert_eq!(
            s.seeder.count(RetentionTable::PensionSnapshots).await,
            RECENT as i64
        );
        for n in 0..RECENT {
            assert!(
                s.seeder
                    .exists(RetentionTable::PensionSnapshots, record_id(10_000 + n))
                    .await
            );
        }
        for record in records.iter().take(20) {
            let id: Uuid = record["id"].as_str().unwrap().parse().unwrap();
            assert!(!s.seeder.exists(RetentionTable::PensionSnapshots, id).await);
        }

        let logs = s
            .db
            .retention_logs()
            .list_by_entity(RetentionEntityType::Pension, 10)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, RetentionAction::Prune);
        assert_eq!(logs[0].records_deleted, ELIGIBLE as i64);
        assert_eq!(logs[0].executor_id, "admin-7");
        assert_eq!(logs[0].metadata["strategy"], "snapshot");
        assert_eq!(logs[0].metadata["batches"], 3);

        let err = s
            .engine
            .orchestrator()
            .prune("admin-7", "PENSION", &cutoff, token)
            .await
            .unwrap_err();
        assert!(matches!(err, RetentionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_interrupted_export_exposes_no_token() {
        let s = setup().await;
        seed_pensions(&s.seeder).await;

        let mut sink = ClosingSink::after(2);
        let err = s
            .engine
            .exports()
            .export_stream("PENSION", &cutoff(), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RetentionError::StreamAborted { records_written: 1000 }
        ));
        let text = String::from_utf8(sink.bytes()).unwrap();
        assert!(!text.contains("pruneToken"));
        assert!(serde_json::from_str::<Value>(&text).is_err());
        assert_eq!(
            s.seeder.count(RetentionTable::PensionSnapshots).await,
            (ELIGIBLE + RECENT) as i64
        );
    }

    #[tokio::test]
    async fn test_historical_prune_keeps_latest_per_owner() {
        let s = setup().await;
        let user = record_id(42);
        let table = RetentionTable::FinancialCheckups;
        s.seeder.insert(table, record_id(1), user, months_ago(20)).await;
        s.seeder.insert(table, record_id(2), user, months_ago(10)).await;
        s.seeder.insert(table, record_id(3), user, months_ago(1)).await;
        // Lone old record of another owner is exempt.
        s.seeder.insert(table, record_id(4), record_id(43), months_ago(30)).await;

        let cutoff = cutoff();
        let mut body = Vec::new();
        s.engine
            .exports()
            .export_stream("FINANCIAL_CHECKUP", &cutoff, &mut body)
            .await
            .unwrap();
        let envelope: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(envelope["records"].as_array().unwrap().len(), 2);
        let token = envelope["security"]["pruneToken"].as_str().unwrap();

        let outcome = s
            .engine
            .orchestrator()
            .prune("admin", "FINANCIAL_CHECKUP", &cutoff, token)
            .await
            .unwrap();

        assert_eq!(outcome.deleted_count, 2);
        assert!(!s.seeder.exists(table, record_id(1)).await);
        assert!(!s.seeder.exists(table, record_id(2)).await);
        assert!(s.seeder.exists(table, record_id(3)).await);
        assert!(s.seeder.exists(table, record_id(4)).await);
    }

    #[tokio::test]
    async fn test_token_for_other_entity_cannot_prune() {
        let s = setup().await;
        seed_pensions(&s.seeder).await;
        let cutoff = cutoff();

        let token = PruneTokenSigner::new(SECRET)
            .mint(RetentionEntityType::Insurance, &cutoff)
            .unwrap();
        let err = s
            .engine
            .orchestrator()
            .prune("admin", "PENSION", &cutoff, &token)
            .await
            .unwrap_err();

        assert!(matches!(err, RetentionError::Security(_)));
        assert_eq!(
            s.seeder.count(RetentionTable::PensionSnapshots).await,
            (ELIGIBLE + RECENT) as i64
        );
    }

    #[tokio::test]
    async fn test_stats_cover_every_table() {
        let s = setup().await;
        let stats = s.engine.stats().await.unwrap();
        assert_eq!(stats.tables.len(), RetentionTable::ALL.len());
        assert!(stats.total_database_bytes > 0);
    }
}
