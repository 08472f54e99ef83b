//! Shared database repository test infrastructure
//!
//! The same test logic runs against both SQLite and PostgreSQL:
//!
//! - **SQLite**: in-memory, runs with every `cargo test`
//! - **PostgreSQL**: testcontainers, run with `cargo test -- --ignored`
//!
//! Each repository test module holds shared async test functions taking a
//! context of trait objects, plus per-backend macros that build the context.
