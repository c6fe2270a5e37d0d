//! # Reconcile
//!
//! Declarative schema migrations for SQL databases.
//!
//! Reconcile provides:
//! - A closed schema model describing the desired tables, columns, relations and enums
//! - Introspection of the live database and a diff against that model
//! - Dialect-aware DDL for PostgreSQL, MySQL and SQLite
//! - Advisory locking, transactional execution, history and rollback
//! - Risk assessment and confirmation before destructive changes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reconcile::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = Schema::from_json_file("schema.json")?;
//!     let db = SqliteDatabase::open(SqliteConfig::from_url("sqlite://./app.db")?).await?;
//!
//!     let engine = MigrationEngine::new(db, MigrationConfig::new())?.with_dialect(Dialect::Sqlite);
//!     let result = engine.apply(&schema).await?;
//!     println!("{} statements applied", result.statements_executed);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Target schema model and validation.
pub mod model {
    pub use reconcile_model::*;
}

/// The migration engine.
pub mod migrate {
    pub use reconcile_migrate::*;
}

/// SQLite database handle.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use reconcile_sqlite::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        Database, Dialect, MigrateResult, MigrationConfig, MigrationEngine, MigrationError,
        MigrationPreview, MigrationResult, RiskLevel,
    };
    pub use crate::model::{Schema, validate_schema};
    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::{SqliteConfig, SqliteDatabase};
}

pub use reconcile_migrate::{MigrationConfig, MigrationEngine, MigrationError};
pub use reconcile_model::Schema;
