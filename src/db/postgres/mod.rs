mod retention;
mod retention_logs;

pub use retention::PostgresRetentionRepo;
pub use retention_logs::PostgresRetentionLogRepo;
