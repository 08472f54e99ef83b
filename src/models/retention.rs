use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Kind of financial record subject to retention.
///
/// Each variant maps to exactly one physical table and one candidate strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetentionEntityType {
    FinancialCheckup,
    Pension,
    Goal,
    Budget,
    Insurance,
}

impl RetentionEntityType {
    pub const ALL: [RetentionEntityType; 5] = [
        RetentionEntityType::FinancialCheckup,
        RetentionEntityType::Pension,
        RetentionEntityType::Goal,
        RetentionEntityType::Budget,
        RetentionEntityType::Insurance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionEntityType::FinancialCheckup => "FINANCIAL_CHECKUP",
            RetentionEntityType::Pension => "PENSION",
            RetentionEntityType::Goal => "GOAL",
            RetentionEntityType::Budget => "BUDGET",
            RetentionEntityType::Insurance => "INSURANCE",
        }
    }
}

impl std::fmt::Display for RetentionEntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RetentionEntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RetentionEntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown entity type: {}", s))
    }
}

/// Physical table holding retention-managed records.
///
/// The set is closed: table names never come from request input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionTable {
    FinancialCheckups,
    Budgets,
    Goals,
    PensionSnapshots,
    InsuranceSnapshots,
}

impl RetentionTable {
    pub const ALL: [RetentionTable; 5] = [
        RetentionTable::FinancialCheckups,
        RetentionTable::Budgets,
        RetentionTable::Goals,
        RetentionTable::PensionSnapshots,
        RetentionTable::InsuranceSnapshots,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RetentionTable::FinancialCheckups => "financial_checkups",
            RetentionTable::Budgets => "budgets",
            RetentionTable::Goals => "goals",
            RetentionTable::PensionSnapshots => "pension_snapshots",
            RetentionTable::InsuranceSnapshots => "insurance_snapshots",
        }
    }
}

impl std::fmt::Display for RetentionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Action recorded in a retention audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetentionAction {
    /// Every batch committed.
    Prune,
    /// A batch failed after at least one earlier batch committed.
    PrunePartial,
}

impl std::fmt::Display for RetentionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetentionAction::Prune => write!(f, "PRUNE"),
            RetentionAction::PrunePartial => write!(f, "PRUNE_PARTIAL"),
        }
    }
}

impl std::str::FromStr for RetentionAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRUNE" => Ok(RetentionAction::Prune),
            "PRUNE_PARTIAL" => Ok(RetentionAction::PrunePartial),
            _ => Err(format!("Invalid retention action: {}", s)),
        }
    }
}

/// Durable record of a completed (or partially completed) prune.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionLog {
    pub id: Uuid,
    /// Identity of the administrator who ran the prune
    pub executor_id: String,
    pub entity_type: RetentionEntityType,
    pub action: RetentionAction,
    pub records_deleted: i64,
    pub cutoff_date: DateTime<Utc>,
    /// Strategy, table, timing and failure details
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a retention audit entry
#[derive(Debug, Clone)]
pub struct CreateRetentionLog {
    pub executor_id: String,
    pub entity_type: RetentionEntityType,
    pub action: RetentionAction,
    pub records_deleted: i64,
    pub cutoff_date: DateTime<Utc>,
    pub metadata: JsonValue,
}

/// Storage footprint of one table, as reported by engine metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub table_name: String,
    /// Estimated live rows. Never computed with `COUNT(*)`.
    pub row_count: i64,
    /// Table size including indexes and toast, in bytes
    pub total_bytes: i64,
    pub index_bytes: i64,
}

/// Storage footprint of all retention-managed tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub tables: Vec<TableStats>,
    pub total_database_bytes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_parse_is_case_sensitive() {
        assert_eq!(
            "FINANCIAL_CHECKUP".parse::<RetentionEntityType>().unwrap(),
            RetentionEntityType::FinancialCheckup
        );
        assert!("financial_checkup".parse::<RetentionEntityType>().is_err());
        assert!("LOAN".parse::<RetentionEntityType>().is_err());
    }

    #[test]
    fn test_entity_type_serde_matches_display() {
        for entity in RetentionEntityType::ALL {
            let json = serde_json::to_string(&entity).unwrap();
            assert_eq!(json, format!("\"{}\"", entity));
        }
    }

    #[test]
    fn test_action_round_trip() {
        for action in [RetentionAction::Prune, RetentionAction::PrunePartial] {
            assert_eq!(action.to_string().parse::<RetentionAction>().unwrap(), action);
        }
    }
}
