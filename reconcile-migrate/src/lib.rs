//! # reconcile-migrate
//!
//! Declarative schema migrations: compare a target schema with a live
//! database and bring the database in line.
//!
//! This crate provides functionality for:
//! - Introspecting tables, columns, keys, indexes and enums from a live database
//! - Diffing the live structure against a [`reconcile_model::Schema`]
//! - Generating dialect-specific DDL, including SQLite table rebuilds
//! - Cross-process advisory locking through a lock table
//! - Transactional or best-effort execution with progress reporting
//! - Migration history with checksums and syntactic rollback
//! - Risk assessment, previews and confirmation for destructive changes
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────┐
//! │ Live DB      │────▶│ Introspector   │────▶│ DB Schema   │
//! └──────────────┘     └────────────────┘     └─────────────┘
//!                                                    │
//! ┌──────────────┐     ┌────────────────┐            ▼
//! │ Target       │────▶│ Target Lowering│────▶┌─────────────┐
//! │ Schema       │     └────────────────┘     │ Differ + DDL│
//! └──────────────┘                            └─────────────┘
//!                                                    │
//!                      ┌────────────────┐            ▼
//!                      │ Lock Table     │◀───┌─────────────┐
//!                      └────────────────┘    │ Executor    │
//!                      ┌────────────────┐    └─────────────┘
//!                      │ History Table  │◀───────────┘
//!                      └────────────────┘
//! ```
//!
//! The engine never connects to anything itself. Callers hand it an
//! implementation of [`Database`]; `reconcile-sqlite` ships one.
//!
//! ## Example
//!
//! ```rust,ignore
//! use reconcile_migrate::{MigrationConfig, MigrationEngine};
//!
//! async fn migrate(db: impl reconcile_migrate::Database, schema: reconcile_model::Schema)
//!     -> Result<(), Box<dyn std::error::Error>>
//! {
//!     let engine = MigrationEngine::new(db, MigrationConfig::new())?;
//!
//!     let preview = engine.preview(&schema).await?;
//!     println!("{}", preview.description);
//!
//!     let result = engine.apply_with_confirmation(&schema).await?;
//!     println!("Executed {} statements in {}ms",
//!         result.statements_executed, result.execution_time_ms);
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod conflicts;
pub mod database;
pub mod ddl;
pub mod dialect;
pub mod diff;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod history;
pub mod introspect;
pub mod lock;
pub mod preview;
pub mod rollback;
pub mod target;

#[cfg(test)]
mod testing;

// Re-exports
pub use clock::{Clock, IdGenerator, ManualClock, SequentialIds, SystemClock, TimestampIds};
pub use config::{LoggingConfig, MigrationConfig, PromptConfig};
pub use database::{ColumnMetadata, Database, Filter, Row, TableMetadata, Transaction};
pub use ddl::{DdlGenerator, ForeignKeyGuard, generator_for};
pub use dialect::{Dialect, DialectCapabilities};
pub use diff::{
    ColumnChange, ColumnRef, DiffOptions, MigrationDiff, MigrationImpact, MigrationSummary,
    RetainedEnumValues, RiskLevel, SchemaDiffer,
};
pub use engine::{IntegrityReport, MigrationEngine, MigrationResult};
pub use error::{MigrateResult, MigrationError};
pub use events::{
    CatalogSource, CollectingObserver, MigrationEvent, MigrationObserver, NoopObserver,
    TracingObserver,
};
pub use executor::{
    ExecutionMode, ExecutionOutcome, Executor, MigrationProgress, ProgressCallback, ProgressPhase,
    StatementError,
};
pub use history::{EnhancedMigrationHistoryEntry, HistoryStore, MigrationHistoryEntry};
pub use introspect::{
    DatabaseColumn, DatabaseEnum, DatabaseForeignKey, DatabaseIndex, DatabaseSchema,
    DatabaseTable, DatabaseUniqueConstraint, DatabaseView, Introspection, IntrospectionConfig,
    Introspector,
};
pub use lock::{LockManager, MigrationLock};
pub use preview::{
    ApproveAll, Confirmer, DenyAll, DetailedSummary, MigrationPreview, RiskAssessment,
    RollbackPreview,
};
pub use rollback::{MigrationRollback, generate_rollback};
