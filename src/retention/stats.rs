//! Table size reporting.

use super::error::RetentionResult;
use crate::{db::RetentionRepo, models::DatabaseStats};

const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

/// Read engine size metadata for every retention table.
pub async fn table_stats(repo: &dyn RetentionRepo) -> RetentionResult<DatabaseStats> {
    Ok(repo.table_stats().await?)
}

/// Human-readable size with binary units: `"0 B"`, `"512 B"`, `"1.50 KB"`.
pub fn format_bytes(bytes: i64) -> String {
    let bytes = bytes.max(0);
    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
