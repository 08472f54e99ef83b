use super::{
    error::{RetentionError, RetentionResult},
    strategy::CandidateStrategy,
};
use crate::models::{RetentionEntityType, RetentionTable};

/// Strategy and table backing an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub entity_type: RetentionEntityType,
    pub strategy: CandidateStrategy,
    pub table: RetentionTable,
}

/// Map an entity type to its strategy and table.
pub fn resolve(entity_type: RetentionEntityType) -> ResolvedTarget {
    let (strategy, table) = match entity_type {
        RetentionEntityType::FinancialCheckup => {
            (CandidateStrategy::Historical, RetentionTable::FinancialCheckups)
        }
        RetentionEntityType::Budget => (CandidateStrategy::Historical, RetentionTable::Budgets),
        RetentionEntityType::Goal => (CandidateStrategy::Historical, RetentionTable::Goals),
        RetentionEntityType::Pension => {
            (CandidateStrategy::Snapshot, RetentionTable::PensionSnapshots)
        }
        RetentionEntityType::Insurance => {
            (CandidateStrategy::Snapshot, RetentionTable::InsuranceSnapshots)
        }
    };
    ResolvedTarget {
        entity_type,
        strategy,
        table,
    }
}

/// Parse an entity type name and resolve it.
pub fn resolve_name(name: &str) -> RetentionResult<ResolvedTarget> {
    let entity_type = name
        .parse::<RetentionEntityType>()
        .map_err(RetentionError::Validation)?;
    Ok(resolve(entity_type))
}
