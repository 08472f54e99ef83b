//! Candidate selection strategies.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::{RetentionError, RetentionResult};
use crate::{
    db::{ReadFrom, RetentionRepo},
    models::RetentionTable,
};

/// Rule deciding which rows of a table may be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStrategy {
    /// Rows older than the cutoff, except each owner's most recent row.
    Historical,
    /// Every row older than the cutoff.
    Snapshot,
}

impl CandidateStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStrategy::Historical => "historical",
            CandidateStrategy::Snapshot => "snapshot",
        }
    }

    /// Tables this strategy may run against.
    pub fn allowed_tables(&self) -> &'static [RetentionTable] {
        match self {
            CandidateStrategy::Historical => &[
                RetentionTable::FinancialCheckups,
                RetentionTable::Budgets,
                RetentionTable::Goals,
            ],
            CandidateStrategy::Snapshot => &[
                RetentionTable::PensionSnapshots,
                RetentionTable::InsuranceSnapshots,
            ],
        }
    }

    /// Ids eligible for deletion, ordered by `(created_at, id)` ascending.
    pub async fn find_candidates(
        &self,
        repo: &dyn RetentionRepo,
        table: RetentionTable,
        cutoff: DateTime<Utc>,
        read_from: ReadFrom,
    ) -> RetentionResult<Vec<String>> {
        if !self.allowed_tables().contains(&table) {
            return Err(RetentionError::Security(format!(
                "Table '{}' is not permitted for the {} strategy",
                table,
                self.as_str()
            )));
        }

        let ids = match self {
            CandidateStrategy::Historical => repo.historical_candidates(table, cutoff, read_from).await?,
            CandidateStrategy::Snapshot => repo.snapshot_candidates(table, cutoff, read_from).await?,
        };
        Ok(ids)
    }
}

impl std::fmt::Display for CandidateStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
