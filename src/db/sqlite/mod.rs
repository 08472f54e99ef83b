mod common;
mod retention;
mod retention_logs;

pub use retention::SqliteRetentionRepo;
pub use retention_logs::SqliteRetentionLogRepo;
