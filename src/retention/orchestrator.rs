//! Token-gated batch deletion.
//!
//! A prune runs strictly in order:
//!
//! 1. Parse the entity type.
//! 2. Validate the prune token against `(entity type, cutoff date)`.
//! 3. Normalize the cutoff and reject it if it falls in the current month.
//! 4. Recompute candidates.
//! 5. Delete them in batches, one transaction per batch.
//! 6. Write the audit entry.
//!
//! Nothing is deleted unless steps 1-4 pass. Once a batch has committed it
//! stays committed; a later failure reports how many rows are already gone.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use tokio::time::Instant;

use super::{
    dates::{ensure_before_boundary, normalize_cutoff},
    error::{RetentionError, RetentionResult},
    resolver::{ResolvedTarget, resolve_name},
    strategy::CandidateStrategy,
    token::PruneTokenSigner,
};
use crate::{
    config::RetentionConfig,
    db::{ReadFrom, RetentionLogRepo, RetentionRepo},
    models::{CreateRetentionLog, RetentionAction, RetentionEntityType, RetentionTable},
    observability::metrics,
};

/// Result of a successful prune.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneOutcome {
    pub deleted_count: u64,
    pub entity_type: RetentionEntityType,
    pub table: RetentionTable,
    pub strategy: CandidateStrategy,
}

/// Progress of the delete phase, carried into the audit entry.
struct DeleteRun {
    started_at: DateTime<Utc>,
    candidate_count: usize,
    batches: usize,
    deleted: u64,
}

#[derive(Clone)]
pub struct RetentionOrchestrator {
    repo: Arc<dyn RetentionRepo>,
    logs: Arc<dyn RetentionLogRepo>,
    signer: PruneTokenSigner,
    batch_size: usize,
    audit_attempts: u32,
    audit_backoff: Duration,
}

impl RetentionOrchestrator {
    pub fn new(
        repo: Arc<dyn RetentionRepo>,
        logs: Arc<dyn RetentionLogRepo>,
        signer: PruneTokenSigner,
        config: &RetentionConfig,
    ) -> Self {
        Self {
            repo,
            logs,
            signer,
            batch_size: (config.batch_size as usize).max(1),
            audit_attempts: config.audit_retry_attempts.max(1),
            audit_backoff: config.audit_backoff(1),
        }
    }

    /// Delete every candidate for `entity_type` older than `cutoff_date`.
    #[tracing::instrument(
        skip(self, prune_token),
        fields(executor = %caller_id)
    )]
    pub async fn prune(
        &self,
        caller_id: &str,
        entity_type: &str,
        cutoff_date: &str,
        prune_token: &str,
    ) -> RetentionResult<PruneOutcome> {
        let timer = Instant::now();
        let result = self
            .run(caller_id, entity_type, cutoff_date, prune_token)
            .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(RetentionError::PartialFailure { .. }) => "partial",
            Err(_) => "rejected",
        };
        metrics::record_prune_duration(
            metric_label(entity_type),
            outcome,
            timer.elapsed().as_secs_f64(),
        );

        result
    }

    async fn run(
        &self,
        caller_id: &str,
        entity_type: &str,
        cutoff_date: &str,
        prune_token: &str,
    ) -> RetentionResult<PruneOutcome> {
        let target = resolve_name(entity_type)?;

        if let Err(e) = self
            .signer
            .validate(prune_token, target.entity_type, cutoff_date)
        {
            tracing::warn!(
                entity_type = target.entity_type.as_str(),
                cutoff_date,
                "Rejected prune with invalid token"
            );
            return Err(e);
        }

        let cutoff = normalize_cutoff(cutoff_date)?;
        ensure_before_boundary(cutoff, Utc::now())?;

        let candidates = target
            .strategy
            .find_candidates(self.repo.as_ref(), target.table, cutoff, ReadFrom::Primary)
            .await?;
        if candidates.is_empty() {
            return Err(RetentionError::NotFound(format!(
                "No {} records eligible for pruning before {}",
                target.entity_type, cutoff_date
            )));
        }

        let mut run = DeleteRun {
            started_at: Utc::now(),
            candidate_count: candidates.len(),
            batches: 0,
            deleted: 0,
        };

        for ids in candidates.chunks(self.batch_size) {
            match self.repo.delete_batch(target.table, ids).await {
                Ok(n) => {
                    run.batches += 1;
                    run.deleted += n;
                    metrics::record_retention_deletion(target.table.name(), n);
                    tracing::debug!(
                        table = %target.table,
                        batch = run.batches,
                        deleted = n,
                        total = run.deleted,
                        "Deleted batch"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        table = %target.table,
                        failed_batch = run.batches + 1,
                        deleted = run.deleted,
                        error = %e,
                        "Prune batch failed, earlier batches remain committed"
                    );
                    if run.deleted > 0 {
                        let metadata = json!({
                            "failedBatch": run.batches + 1,
                            "error": e.to_string(),
                        });
                        self.audit(
                            caller_id,
                            &target,
                            cutoff,
                            RetentionAction::PrunePartial,
                            &run,
                            metadata,
                        )
                        .await;
                    }
                    return Err(RetentionError::PartialFailure {
                        deleted: run.deleted,
                        source: e,
                    });
                }
            }
        }

        if run.deleted == 0 {
            tracing::warn!(
                entity_type = target.entity_type.as_str(),
                table = %target.table,
                candidates = run.candidate_count,
                "Every candidate was already gone, nothing deleted"
            );
            return Err(RetentionError::NotFound(format!(
                "No {} records left to prune before {}",
                target.entity_type, cutoff_date
            )));
        }

        self.audit(
            caller_id,
            &target,
            cutoff,
            RetentionAction::Prune,
            &run,
            json!({}),
        )
        .await;

        tracing::info!(
            entity_type = target.entity_type.as_str(),
            table = %target.table,
            strategy = %target.strategy,
            cutoff_date,
            deleted = run.deleted,
            batches = run.batches,
            "Prune completed"
        );

        Ok(PruneOutcome {
            deleted_count: run.deleted,
            entity_type: target.entity_type,
            table: target.table,
            strategy: target.strategy,
        })
    }

    /// Best-effort audit write. Failures are retried, then logged.
    async fn audit(
        &self,
        caller_id: &str,
        target: &ResolvedTarget,
        cutoff: DateTime<Utc>,
        action: RetentionAction,
        run: &DeleteRun,
        extra: serde_json::Value,
    ) {
        let mut metadata = json!({
            "strategy": target.strategy.as_str(),
            "table": target.table.name(),
            "startedAt": run.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "completedAt": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "batchSize": self.batch_size,
            "batches": run.batches,
            "candidateCount": run.candidate_count,
            "partial": action == RetentionAction::PrunePartial,
        });
        if let (Some(base), Some(extra)) = (metadata.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }

        let entry = CreateRetentionLog {
            executor_id: caller_id.to_string(),
            entity_type: target.entity_type,
            action,
            records_deleted: run.deleted as i64,
            cutoff_date: cutoff,
            metadata,
        };

        for attempt in 1..=self.audit_attempts {
            match self.logs.create(entry.clone()).await {
                Ok(log) => {
                    tracing::debug!(log_id = %log.id, %action, "Wrote retention audit entry");
                    return;
                }
                Err(e) if attempt < self.audit_attempts => {
                    tracing::warn!(attempt, error = %e, "Retention audit write failed, retrying");
                    tokio::time::sleep(self.audit_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::error!(
                        attempts = self.audit_attempts,
                        entity_type = target.entity_type.as_str(),
                        deleted = run.deleted,
                        %action,
                        error = %e,
                        "Retention audit entry could not be written"
                    );
                    metrics::record_audit_failure(target.entity_type.as_str());
                }
            }
        }
    }
}

/// Metric label for a requested entity type. Unknown names share one label.
fn metric_label(entity_type: &str) -> &'static str {
    resolve_name(entity_type)
        .map(|target| target.entity_type.as_str())
        .unwrap_or("invalid")
}
