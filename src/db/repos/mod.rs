mod retention;
mod retention_logs;

pub use retention::*;
pub use retention_logs::*;
