//! Structured events emitted by the engine.
//!
//! The engine never formats log lines. It reports [`MigrationEvent`]s to a
//! [`MigrationObserver`]; [`TracingObserver`] turns them into `tracing`
//! records.

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::LoggingConfig;
use crate::diff::RiskLevel;

/// Where the introspector got constraint information from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSource {
    /// Only the driver's generic table metadata.
    Generic,
    /// SQLite pragmas.
    SqlitePragma,
    /// PostgreSQL `information_schema`/`pg_catalog`.
    PostgresCatalog,
    /// MySQL `information_schema`.
    MysqlCatalog,
}

/// Something the engine did or noticed.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationEvent {
    /// The live schema was read.
    IntrospectionCompleted {
        tables: usize,
        views: usize,
        source: CatalogSource,
    },
    /// A diff was computed.
    DiffComputed {
        statements: usize,
        destructive: bool,
        risk: RiskLevel,
    },
    /// Enum values exist in the database but not in the target; they are kept.
    EnumValuesRetained {
        enum_name: String,
        values: Vec<String>,
    },
    /// A lock row was written.
    LockAcquired {
        lock_id: String,
        migration_id: String,
    },
    /// A live lock row already existed.
    LockContended { migration_id: String },
    /// A lock row was removed.
    LockReleased { lock_id: String },
    /// Removing a lock row failed; it will expire on its own.
    LockReleaseFailed { lock_id: String, error: String },
    /// Purging expired lock rows failed.
    ExpiredLockPurgeFailed { error: String },
    /// Checking for a lock failed and was treated as unlocked.
    LockCheckFailed { error: String },
    /// A statement is about to run.
    StatementStarted {
        step: usize,
        total: usize,
        statement: String,
    },
    /// A statement finished.
    StatementCompleted {
        step: usize,
        total: usize,
        elapsed_ms: u64,
    },
    /// A statement failed.
    StatementFailed {
        step: usize,
        statement: String,
        error: String,
    },
    /// Best-effort execution stopped early because the stop flag was raised.
    ExecutionStopped { executed: usize, remaining: usize },
    /// Foreign key enforcement was switched off for a table rebuild.
    ForeignKeysSuspended,
    /// Foreign key enforcement was switched back on.
    ForeignKeysRestored,
    /// A transaction was rolled back after a failure.
    TransactionRolledBack { error: String },
    /// A history row was written.
    MigrationRecorded {
        migration_id: String,
        checksum: String,
        success: bool,
    },
    /// Writing a history row failed after the statements ran.
    HistoryWriteFailed { migration_id: String, error: String },
    /// A rollback ran and its history was rewritten.
    RollbackCompleted {
        migration_id: String,
        statements: usize,
    },
    /// The confirmation gate asked for explicit approval.
    ConfirmationRequested { risk: RiskLevel },
    /// The confirmation gate refused.
    MigrationCancelled { risk: RiskLevel },
    /// An apply finished, successfully or not.
    MigrationCompleted {
        success: bool,
        statements_executed: usize,
        execution_time_ms: u64,
    },
}

/// Receives engine events.
pub trait MigrationObserver: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &MigrationEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl MigrationObserver for NoopObserver {
    fn on_event(&self, _event: &MigrationEvent) {}
}

/// Stores every event, in order.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<MigrationEvent>>,
}

impl CollectingObserver {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events seen so far.
    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events.lock().clone()
    }

    /// Forget everything seen so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl MigrationObserver for CollectingObserver {
    fn on_event(&self, event: &MigrationEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    logging: LoggingConfig,
}

impl TracingObserver {
    /// Create an observer honoring the given logging switches.
    pub fn new(logging: LoggingConfig) -> Self {
        Self { logging }
    }
}

impl MigrationObserver for TracingObserver {
    fn on_event(&self, event: &MigrationEvent) {
        use MigrationEvent::*;

        match event {
            IntrospectionCompleted {
                tables,
                views,
                source,
            } => debug!(tables, views, source = ?source, "Introspected database"),
            DiffComputed {
                statements,
                destructive,
                risk,
            } => info!(statements, destructive, risk = %risk, "Computed schema diff"),
            EnumValuesRetained { enum_name, values } => {
                warn!(enum_name = %enum_name, values = ?values, "Enum values not removed automatically")
            }
            LockAcquired {
                lock_id,
                migration_id,
            } => debug!(lock_id = %lock_id, migration_id = %migration_id, "Acquired migration lock"),
            LockContended { migration_id } => {
                warn!(migration_id = %migration_id, "Migration lock is held by another process")
            }
            LockReleased { lock_id } => debug!(lock_id = %lock_id, "Released migration lock"),
            LockReleaseFailed { lock_id, error } => {
                warn!(lock_id = %lock_id, error = %error, "Failed to release migration lock")
            }
            ExpiredLockPurgeFailed { error } => {
                warn!(error = %error, "Failed to purge expired migration locks")
            }
            LockCheckFailed { error } => warn!(error = %error, "Failed to check migration lock"),
            StatementStarted {
                step,
                total,
                statement,
            } => {
                if self.logging.log_statements {
                    debug!(step, total, sql = %statement, "Executing statement");
                }
            }
            StatementCompleted {
                step,
                total,
                elapsed_ms,
            } => {
                if self.logging.log_progress {
                    debug!(step, total, elapsed_ms, "Statement completed");
                }
            }
            StatementFailed {
                step,
                statement,
                error,
            } => warn!(step, sql = %statement, error = %error, "Statement failed"),
            ExecutionStopped {
                executed,
                remaining,
            } => warn!(executed, remaining, "Execution stopped before completion"),
            ForeignKeysSuspended => debug!("Suspended foreign key enforcement for table rebuild"),
            ForeignKeysRestored => debug!("Restored foreign key enforcement"),
            TransactionRolledBack { error } => {
                warn!(error = %error, "Migration transaction rolled back")
            }
            MigrationRecorded {
                migration_id,
                checksum,
                success,
            } => info!(migration_id = %migration_id, checksum = %checksum, success, "Recorded migration"),
            HistoryWriteFailed {
                migration_id,
                error,
            } => warn!(migration_id = %migration_id, error = %error, "Failed to record migration"),
            RollbackCompleted {
                migration_id,
                statements,
            } => info!(migration_id = %migration_id, statements, "Rolled back migration"),
            ConfirmationRequested { risk } => {
                info!(risk = %risk, "Migration requires explicit confirmation")
            }
            MigrationCancelled { risk } => info!(risk = %risk, "Migration cancelled"),
            MigrationCompleted {
                success,
                statements_executed,
                execution_time_ms,
            } => {
                if self.logging.log_execution_times {
                    info!(success, statements_executed, execution_time_ms, "Migration finished");
                } else {
                    info!(success, statements_executed, "Migration finished");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_observer() {
        let observer = CollectingObserver::new();
        observer.on_event(&MigrationEvent::LockReleased {
            lock_id: "lock_1".into(),
        });
        observer.on_event(&MigrationEvent::LockContended {
            migration_id: "schema".into(),
        });

        let events = observer.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], MigrationEvent::LockContended { .. }));

        observer.clear();
        assert!(observer.events().is_empty());
    }

    #[test]
    fn test_tracing_observer_handles_every_event() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();

        let observer = TracingObserver::new(LoggingConfig {
            log_statements: true,
            log_progress: true,
            log_execution_times: false,
        });
        observer.on_event(&MigrationEvent::StatementStarted {
            step: 1,
            total: 2,
            statement: "CREATE TABLE \"a\" (\"id\" integer)".into(),
        });
        observer.on_event(&MigrationEvent::MigrationCompleted {
            success: true,
            statements_executed: 2,
            execution_time_ms: 5,
        });
        NoopObserver.on_event(&MigrationEvent::LockReleased {
            lock_id: "x".into(),
        });
    }
}
