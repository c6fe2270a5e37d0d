//! SQLite database handle for the reconcile migration engine.
//!
//! [`SqliteDatabase`] implements [`reconcile_migrate::Database`] over
//! `tokio-rusqlite`, so the engine can introspect, lock, migrate and record
//! history against an in-memory or file-based SQLite database.
//!
//! # Example
//!
//! ```rust,ignore
//! use reconcile_migrate::{MigrationConfig, MigrationEngine, Dialect};
//! use reconcile_sqlite::{SqliteConfig, SqliteDatabase};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = SqliteDatabase::open(SqliteConfig::from_url("sqlite://./app.db")?).await?;
//!     let engine = MigrationEngine::new(db, MigrationConfig::new())?.with_dialect(Dialect::Sqlite);
//!     // engine.apply(&schema).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod types;

pub use config::{DatabasePath, JournalMode, SqliteConfig, SynchronousMode};
pub use database::{SqliteDatabase, SqliteTransaction};
pub use error::{SqliteError, SqliteResult};
