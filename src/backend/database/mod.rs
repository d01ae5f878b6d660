//! SQL implementations of the account store
//!
//! ```text
//! Shared logic (account_insert.rs, config.rs)
//!     ↓
//! Database-specific implementations
//!     ├── postgres/ (PostgreSQL schema, queries, store)
//!     └── sqlite/   (SQLite schema, queries, store)
//! ```

pub mod account_insert;
pub mod config;
pub mod postgres;
pub mod sqlite;

pub use account_insert::{AccountInsertProcessor, PreparedAccount};
pub use config::DatabaseBackendConfig;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;
