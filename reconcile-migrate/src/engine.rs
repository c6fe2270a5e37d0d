//! Migration engine implementation.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use reconcile_model::{Schema, validate_schema};

use crate::clock::{Clock, IdGenerator, SystemClock, TimestampIds};
use crate::config::MigrationConfig;
use crate::database::Database;
use crate::dialect::{Dialect, DialectCapabilities};
use crate::diff::{DiffOptions, MigrationDiff, SchemaDiffer};
use crate::error::{MigrateResult, MigrationError};
use crate::events::{MigrationEvent, MigrationObserver, TracingObserver};
use crate::executor::{ExecutionMode, Executor, ProgressCallback, StatementError};
use crate::history::{
    EnhancedMigrationHistoryEntry, HistoryStore, MigrationHistoryEntry, format_timestamp,
    statements_checksum,
};
use crate::introspect::{Introspection, IntrospectionConfig, Introspector};
use crate::lock::{LockManager, MigrationLock};
use crate::preview::{
    ConfirmationGate, Confirmer, DenyAll, DetailedSummary, MigrationPreview, build_preview,
    confirmation_gate, migration_warnings,
};
use crate::rollback::{MigrationRollback, generate_rollback};

/// Message of the error returned when the confirmer refuses.
pub const CANCELLED_BY_USER: &str = "Migration cancelled by user";

/// Message of the error returned when a confirmed preview went stale.
pub const SCHEMA_CHANGED: &str = "Database schema changed since the preview was generated";

/// Result of an apply or rollback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationResult {
    pub success: bool,
    pub statements_executed: usize,
    pub execution_time_ms: u64,
    pub errors: Vec<StatementError>,
    pub warnings: Vec<String>,
    /// History id, when a history row was written.
    pub migration_id: Option<String>,
}

impl MigrationResult {
    fn failed(message: impl Into<String>, started: Instant) -> Self {
        Self {
            errors: vec![StatementError::message(message)],
            execution_time_ms: elapsed_ms(started),
            ..Default::default()
        }
    }

    fn nothing_to_do(warnings: Vec<String>, started: Instant) -> Self {
        Self {
            success: true,
            warnings,
            execution_time_ms: elapsed_ms(started),
            ..Default::default()
        }
    }
}

/// Outcome of [`MigrationEngine::validate_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checksum_valid: bool,
    pub schema_integrity_valid: bool,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// The main migration engine.
pub struct MigrationEngine<D: Database> {
    db: D,
    config: MigrationConfig,
    dialect: Dialect,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    observer: Arc<dyn MigrationObserver>,
    confirmer: Arc<dyn Confirmer>,
}

impl<D: Database> MigrationEngine<D> {
    /// Create an engine. Bookkeeping tables use PostgreSQL-style quoting
    /// until [`with_dialect`](Self::with_dialect) says otherwise.
    pub fn new(db: D, config: MigrationConfig) -> MigrateResult<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Self {
            db,
            dialect: Dialect::Postgres,
            ids: Arc::new(TimestampIds::new(Arc::clone(&clock))),
            clock,
            observer: Arc::new(TracingObserver::new(config.logging.clone())),
            confirmer: Arc::new(DenyAll),
            config,
        })
    }

    /// Dialect of the bookkeeping tables.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Replace the clock. Identifier generation keeps its own source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn MigrationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Who answers explicit confirmation requests. Defaults to [`DenyAll`].
    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }

    /// The database handle.
    pub fn database(&self) -> &D {
        &self.db
    }

    /// The active configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    fn history_store(&self) -> HistoryStore<'_> {
        HistoryStore::new(&self.db, &self.config.history_table, self.dialect)
    }

    fn lock_manager(&self) -> LockManager<'_> {
        LockManager::new(
            &self.db,
            &self.config.lock_table,
            self.dialect,
            self.clock.as_ref(),
            self.ids.as_ref(),
            self.observer.as_ref(),
        )
    }

    fn emit(&self, event: MigrationEvent) {
        self.observer.on_event(&event);
    }

    fn rebuild_suffix(&self) -> String {
        self.clock.now().timestamp_millis().to_string()
    }

    async fn introspect(&self, dialect: Dialect) -> MigrateResult<Introspection> {
        let config = IntrospectionConfig::excluding(self.config.bookkeeping_tables());
        let introspection = Introspector::new(&self.db, config)
            .introspect(dialect)
            .await?;
        self.emit(MigrationEvent::IntrospectionCompleted {
            tables: introspection.schema.tables.len(),
            views: introspection.schema.views.len(),
            source: introspection.source,
        });
        Ok(introspection)
    }

    /// Validate, introspect and diff.
    async fn plan(&self, schema: &Schema, suffix: &str) -> MigrateResult<(MigrationDiff, Introspection)> {
        validate_schema(schema)?;
        let dialect = Dialect::from_schema(schema);
        let introspection = self.introspect(dialect).await?;

        let capabilities =
            DialectCapabilities::for_dialect(dialect, introspection.sqlite_version.as_deref());
        let diff = SchemaDiffer::new(&introspection.schema, schema, dialect)
            .with_capabilities(capabilities)
            .with_options(DiffOptions {
                rebuild_suffix: suffix.to_string(),
            })
            .diff();

        self.emit(MigrationEvent::DiffComputed {
            statements: diff.statements.len(),
            destructive: diff.has_destructive_changes,
            risk: diff.impact.risk_level,
        });
        for retained in &diff.retained_enum_values {
            self.emit(MigrationEvent::EnumValuesRetained {
                enum_name: retained.enum_name.clone(),
                values: retained.values.clone(),
            });
        }
        Ok((diff, introspection))
    }

    /// Statements that would bring the database to `schema`.
    ///
    /// A malformed schema fails before the database is touched.
    pub async fn diff(&self, schema: &Schema) -> MigrateResult<MigrationDiff> {
        let suffix = self.rebuild_suffix();
        Ok(self.plan(schema, &suffix).await?.0)
    }

    /// Whether the database already matches `schema`.
    pub async fn validate(&self, schema: &Schema) -> MigrateResult<bool> {
        Ok(self.diff(schema).await?.is_empty())
    }

    /// Bring the database to `schema`.
    pub async fn apply(&self, schema: &Schema) -> MigrateResult<MigrationResult> {
        self.apply_with_progress(schema, None, None).await
    }

    /// [`apply`](Self::apply) with progress reports and a stop flag.
    ///
    /// Fails outright for a malformed schema or a held lock. Everything after
    /// the lock is taken is reported through the returned result.
    pub async fn apply_with_progress(
        &self,
        schema: &Schema,
        progress: Option<ProgressCallback<'_>>,
        stop: Option<Arc<AtomicBool>>,
    ) -> MigrateResult<MigrationResult> {
        validate_schema(schema)?;
        let suffix = self.rebuild_suffix();
        self.apply_under_lock(schema, &suffix, progress, stop, None).await
    }

    /// Preview, ask for confirmation when the risk calls for it, then apply.
    pub async fn apply_with_confirmation(&self, schema: &Schema) -> MigrateResult<MigrationResult> {
        let started = Instant::now();
        let suffix = self.rebuild_suffix();
        let (diff, introspection) = self.plan(schema, &suffix).await?;
        let preview = build_preview(&diff, &introspection.schema);

        let risk = preview.risk_assessment.level;
        let prompt = &self.config.prompt;
        if confirmation_gate(risk, prompt) == ConfirmationGate::ExplicitRequired {
            self.emit(MigrationEvent::ConfirmationRequested { risk });
            let shown = if prompt.show_detailed_summary {
                preview.clone()
            } else {
                MigrationPreview {
                    summary: DetailedSummary::default(),
                    ..preview.clone()
                }
            };
            if !self.confirmer.confirm(&shown) {
                self.emit(MigrationEvent::MigrationCancelled { risk });
                return Ok(MigrationResult::failed(CANCELLED_BY_USER, started));
            }
        }

        if preview.statements.is_empty() {
            return Ok(MigrationResult::nothing_to_do(preview.warnings, started));
        }

        self.apply_under_lock(schema, &suffix, None, None, Some(&preview.statements))
            .await
    }

    async fn apply_under_lock(
        &self,
        schema: &Schema,
        suffix: &str,
        progress: Option<ProgressCallback<'_>>,
        stop: Option<Arc<AtomicBool>>,
        expected: Option<&[String]>,
    ) -> MigrateResult<MigrationResult> {
        let locks = self.lock_manager();
        let lock = locks
            .acquire(&self.config.lock_scope, self.config.lock_timeout_ms)
            .await?;

        let result = self.apply_locked(schema, suffix, progress, stop, expected).await;

        locks.release(&lock).await;
        self.emit(MigrationEvent::MigrationCompleted {
            success: result.success,
            statements_executed: result.statements_executed,
            execution_time_ms: result.execution_time_ms,
        });
        Ok(result)
    }

    async fn apply_locked(
        &self,
        schema: &Schema,
        suffix: &str,
        progress: Option<ProgressCallback<'_>>,
        stop: Option<Arc<AtomicBool>>,
        expected: Option<&[String]>,
    ) -> MigrationResult {
        let started = Instant::now();

        let diff = match self.plan(schema, suffix).await {
            Ok((diff, _)) => diff,
            Err(e) => return MigrationResult::failed(e.to_string(), started),
        };
        if expected.is_some_and(|statements| statements != diff.statements.as_slice()) {
            return MigrationResult::failed(SCHEMA_CHANGED, started);
        }
        let mut warnings = diff.impact.warnings.clone();
        if diff.is_empty() {
            return MigrationResult::nothing_to_do(warnings, started);
        }

        let mode = ExecutionMode::from_use_transaction(self.config.use_transaction);
        let outcome = Executor::new(&self.db, self.observer.as_ref(), mode)
            .with_progress(progress)
            .with_stop_flag(stop)
            .with_foreign_key_guard(diff.foreign_key_guard.as_ref())
            .run(&diff.statements)
            .await;

        let record = outcome.success
            || (self.config.record_failed_migrations && !outcome.executed.is_empty());
        let mut migration_id = None;
        if record {
            let id = self.ids.generate("migration");
            let now = self.clock.now();
            let entry = EnhancedMigrationHistoryEntry {
                entry: MigrationHistoryEntry {
                    id: id.clone(),
                    name: format!("Migration {}", format_timestamp(now)),
                    checksum: statements_checksum(&outcome.executed),
                    applied_at: now,
                    execution_time_ms: outcome.elapsed_ms,
                    success: outcome.success,
                },
                statements: outcome.executed.clone(),
                dependencies: diff.impact.tables_affected.clone(),
                schema_version: Some(format!("v{}", now.timestamp_millis())),
                rollback: outcome
                    .success
                    .then(|| generate_rollback(&id, &outcome.executed)),
            };
            match self.history_store().record(&entry).await {
                Ok(()) => {
                    self.emit(MigrationEvent::MigrationRecorded {
                        migration_id: id.clone(),
                        checksum: entry.entry.checksum.clone(),
                        success: outcome.success,
                    });
                    migration_id = Some(id);
                }
                Err(e) => {
                    let error = e.to_string();
                    warnings.push(format!("Failed to record migration: {error}"));
                    self.emit(MigrationEvent::HistoryWriteFailed {
                        migration_id: id,
                        error,
                    });
                }
            }
        }

        MigrationResult {
            success: outcome.success,
            statements_executed: outcome.statements_executed,
            execution_time_ms: elapsed_ms(started),
            errors: outcome.errors,
            warnings,
            migration_id,
        }
    }

    /// Preview of what [`apply`](Self::apply) would do.
    pub async fn preview(&self, schema: &Schema) -> MigrateResult<MigrationPreview> {
        let suffix = self.rebuild_suffix();
        let (diff, introspection) = self.plan(schema, &suffix).await?;
        Ok(build_preview(&diff, &introspection.schema))
    }

    /// Operational warnings for applying `schema`.
    pub async fn migration_warnings(&self, schema: &Schema) -> MigrateResult<Vec<String>> {
        let suffix = self.rebuild_suffix();
        let (diff, introspection) = self.plan(schema, &suffix).await?;
        Ok(migration_warnings(&diff, &introspection.schema))
    }

    /// Applied migrations, newest first.
    pub async fn history(&self) -> MigrateResult<Vec<MigrationHistoryEntry>> {
        self.history_store().list().await
    }

    /// Applied migrations with statements and rollback data, newest first.
    pub async fn enhanced_history(&self) -> MigrateResult<Vec<EnhancedMigrationHistoryEntry>> {
        self.history_store().list_enhanced().await
    }

    /// Add history columns missing from an older layout.
    pub async fn upgrade_history_table(&self) -> MigrateResult<Vec<String>> {
        self.history_store().upgrade_table().await
    }

    /// Check the history for consistency and the database for readability.
    pub async fn validate_integrity(&self) -> IntegrityReport {
        let entries = match self.history_store().list_enhanced().await {
            Ok(entries) => entries,
            Err(e) => {
                return IntegrityReport {
                    errors: vec![format!("Validation failed: {e}")],
                    ..Default::default()
                };
            }
        };

        let mut report = IntegrityReport {
            checksum_valid: true,
            schema_integrity_valid: true,
            ..Default::default()
        };

        let mut seen = std::collections::HashSet::new();
        for entry in &entries {
            let id = &entry.entry.id;
            if !seen.insert(id.as_str()) {
                report.errors.push(format!("Duplicate migration ID found: {id}"));
            }
            if entry.entry.checksum.is_empty() {
                report.errors.push(format!("Missing checksum for migration: {id}"));
                report.checksum_valid = false;
            } else if !entry.statements.is_empty()
                && statements_checksum(&entry.statements) != entry.entry.checksum
            {
                report.errors.push(format!("Checksum mismatch for migration: {id}"));
                report.checksum_valid = false;
            }
        }

        let failed = entries.iter().filter(|e| !e.entry.success).count();
        if failed > 0 {
            report.warnings.push(format!("Found {failed} failed migrations"));
        }

        if let Err(e) = self.introspect(self.dialect).await {
            report.errors.push(format!("Schema introspection failed: {e}"));
            report.schema_integrity_valid = false;
        }

        report.is_valid = report.errors.is_empty();
        report
    }

    /// Take a lock directly.
    pub async fn acquire_lock(&self, migration_id: &str, timeout_ms: u64) -> MigrateResult<MigrationLock> {
        self.lock_manager().acquire(migration_id, timeout_ms).await
    }

    /// Release a lock taken by this process. Never fails.
    pub async fn release_lock(&self, lock: &MigrationLock) {
        self.lock_manager().release(lock).await;
    }

    /// Whether a live lock exists, for one id or any.
    pub async fn is_locked(&self, migration_id: Option<&str>) -> bool {
        self.lock_manager().is_locked(migration_id).await
    }

    async fn successful_entry(&self, migration_id: &str) -> MigrateResult<EnhancedMigrationHistoryEntry> {
        let entry = self
            .history_store()
            .find(migration_id)
            .await?
            .ok_or_else(|| MigrationError::NotFound(migration_id.to_string()))?;
        if !entry.entry.success {
            return Err(MigrationError::RollbackUnavailable {
                id: migration_id.to_string(),
                reasons: vec!["the migration did not complete successfully".to_string()],
            });
        }
        Ok(entry)
    }

    /// Reverse statements for a recorded migration, regenerated from its
    /// executed statements.
    pub async fn generate_rollback(&self, migration_id: &str) -> MigrateResult<MigrationRollback> {
        let entry = self.successful_entry(migration_id).await?;
        Ok(generate_rollback(migration_id, &entry.statements))
    }

    /// Undo a recorded migration and drop it from the history.
    ///
    /// Fails outright when the migration is unknown, failed, or has no
    /// complete inverse. Execution failures come back in the result.
    pub async fn rollback(&self, migration_id: &str) -> MigrateResult<MigrationResult> {
        let locks = self.lock_manager();
        let lock = locks
            .acquire(&self.config.lock_scope, self.config.lock_timeout_ms)
            .await?;
        let result = self.rollback_locked(migration_id).await;
        locks.release(&lock).await;
        result
    }

    async fn rollback_locked(&self, migration_id: &str) -> MigrateResult<MigrationResult> {
        let started = Instant::now();
        let entry = self.successful_entry(migration_id).await?;

        let rollback = match entry.rollback {
            Some(stored) if stored.can_rollback => stored,
            _ => generate_rollback(migration_id, &entry.statements),
        };
        if !rollback.can_rollback {
            let reasons = if rollback.warnings.is_empty() {
                vec!["no reverse statements could be derived".to_string()]
            } else {
                rollback.warnings
            };
            return Err(MigrationError::RollbackUnavailable {
                id: migration_id.to_string(),
                reasons,
            });
        }

        let mode = ExecutionMode::from_use_transaction(self.config.use_transaction);
        let outcome = Executor::new(&self.db, self.observer.as_ref(), mode)
            .run(&rollback.rollback_statements)
            .await;

        let mut warnings = Vec::new();
        if outcome.success {
            let store = self.history_store();
            let now = self.clock.now();
            let record = EnhancedMigrationHistoryEntry {
                entry: MigrationHistoryEntry {
                    id: self.ids.generate(&format!("rollback_{migration_id}")),
                    name: format!("Rollback of {migration_id}"),
                    checksum: rollback.rollback_checksum.clone(),
                    applied_at: now,
                    execution_time_ms: outcome.elapsed_ms,
                    success: true,
                },
                statements: rollback.rollback_statements.clone(),
                dependencies: vec![],
                schema_version: None,
                rollback: None,
            };
            if let Err(e) = store.record(&record).await {
                warnings.push(format!("Failed to record rollback: {e}"));
            }
            if let Err(e) = store.remove(migration_id).await {
                warnings.push(format!("Failed to remove migration from history: {e}"));
            }
            self.emit(MigrationEvent::RollbackCompleted {
                migration_id: migration_id.to_string(),
                statements: outcome.statements_executed,
            });
        }

        Ok(MigrationResult {
            success: outcome.success,
            statements_executed: outcome.statements_executed,
            execution_time_ms: elapsed_ms(started),
            errors: outcome.errors,
            warnings,
            migration_id: None,
        })
    }
}
