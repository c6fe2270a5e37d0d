//! Statement execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::{Database, Row, Transaction, row_str};
use crate::ddl::ForeignKeyGuard;
use crate::error::MigrateResult;
use crate::events::{MigrationEvent, MigrationObserver};

/// How a statement list is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One transaction; the first failure rolls everything back.
    Transactional,
    /// Statement by statement; failures are collected and skipped.
    BestEffort,
}

impl ExecutionMode {
    /// Mode for the `use_transaction` setting.
    pub fn from_use_transaction(use_transaction: bool) -> Self {
        if use_transaction {
            Self::Transactional
        } else {
            Self::BestEffort
        }
    }
}

/// Where in a statement's life a progress report was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Executing,
    Completed,
    Failed,
}

/// A progress report, sent before and after each statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    /// 1-based index of the statement.
    pub current_step: usize,
    pub total_steps: usize,
    /// The statement, shortened for display.
    pub current_operation: String,
    pub percent_complete: f64,
    #[serde(rename = "timeElapsed")]
    pub time_elapsed_ms: u64,
    pub statements_executed: usize,
    pub phase: ProgressPhase,
}

/// Progress sink.
pub type ProgressCallback<'a> = &'a (dyn Fn(&MigrationProgress) + Send + Sync);

/// A statement the database rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementError {
    pub message: String,
    pub statement: Option<String>,
}

impl StatementError {
    /// An error not tied to a statement.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            statement: None,
        }
    }
}

/// What happened when a statement list ran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Statements that ran without error and were not rolled back.
    pub statements_executed: usize,
    /// Those statements, in order.
    pub executed: Vec<String>,
    pub errors: Vec<StatementError>,
    /// Best-effort run halted by the stop flag.
    pub stopped: bool,
    pub elapsed_ms: u64,
}

const OPERATION_PREVIEW_CHARS: usize = 50;

fn shorten(statement: &str) -> String {
    if statement.chars().count() > OPERATION_PREVIEW_CHARS {
        let head: String = statement.chars().take(OPERATION_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        statement.to_string()
    }
}

fn violation_error(guard: &ForeignKeyGuard, violations: &[Row]) -> StatementError {
    let mut tables: Vec<String> = Vec::new();
    for table in violations.iter().filter_map(|row| row_str(row, "table")) {
        if !tables.contains(&table) {
            tables.push(table);
        }
    }
    StatementError {
        message: format!(
            "Foreign key check failed: {} dangling reference(s) in [{}]",
            violations.len(),
            tables.join(", ")
        ),
        statement: Some(guard.check.clone()),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Runs statements against a [`Database`].
pub struct Executor<'a> {
    db: &'a dyn Database,
    observer: &'a dyn MigrationObserver,
    mode: ExecutionMode,
    progress: Option<ProgressCallback<'a>>,
    stop: Option<Arc<AtomicBool>>,
    guard: Option<&'a ForeignKeyGuard>,
}

impl<'a> Executor<'a> {
    /// An executor without progress reporting.
    pub fn new(db: &'a dyn Database, observer: &'a dyn MigrationObserver, mode: ExecutionMode) -> Self {
        Self {
            db,
            observer,
            mode,
            progress: None,
            stop: None,
            guard: None,
        }
    }

    /// Report progress to `callback`.
    pub fn with_progress(mut self, callback: Option<ProgressCallback<'a>>) -> Self {
        self.progress = callback;
        self
    }

    /// Check `flag` between statements. Only best-effort runs honor it; a
    /// statement already sent is never interrupted.
    pub fn with_stop_flag(mut self, flag: Option<Arc<AtomicBool>>) -> Self {
        self.stop = flag;
        self
    }

    /// Suspend foreign key enforcement around the run and verify the
    /// references before it finishes.
    pub fn with_foreign_key_guard(mut self, guard: Option<&'a ForeignKeyGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Run `statements` in order.
    pub async fn run(&self, statements: &[String]) -> ExecutionOutcome {
        let guard = match self.guard {
            Some(guard) if !statements.is_empty() => match self.suspend_foreign_keys(guard).await {
                Ok(suspended) => suspended.then_some(guard),
                Err(e) => {
                    return ExecutionOutcome {
                        errors: vec![StatementError {
                            message: e.to_string(),
                            statement: Some(guard.disable.clone()),
                        }],
                        ..Default::default()
                    };
                }
            },
            _ => None,
        };

        let mut outcome = match self.mode {
            ExecutionMode::Transactional => self.run_transactional(statements, guard).await,
            ExecutionMode::BestEffort => self.run_best_effort(statements, guard).await,
        };

        if let Some(guard) = guard {
            match self.db.execute(&guard.enable).await {
                Ok(()) => self.observer.on_event(&MigrationEvent::ForeignKeysRestored),
                Err(e) => {
                    outcome.success = false;
                    outcome.errors.push(StatementError {
                        message: e.to_string(),
                        statement: Some(guard.enable.clone()),
                    });
                }
            }
        }
        outcome
    }

    /// Turn enforcement off if it is on. Returns whether it was.
    async fn suspend_foreign_keys(&self, guard: &ForeignKeyGuard) -> MigrateResult<bool> {
        let rows = self.db.query(&guard.status).await?;
        let enforced = rows
            .first()
            .and_then(|row| row.values().next())
            .is_some_and(|value| match value {
                Value::Number(n) => n.as_i64() != Some(0),
                Value::Bool(b) => *b,
                Value::String(s) => s != "0",
                _ => false,
            });
        if enforced {
            self.db.execute(&guard.disable).await?;
            self.observer.on_event(&MigrationEvent::ForeignKeysSuspended);
        }
        Ok(enforced)
    }

    async fn run_transactional(
        &self,
        statements: &[String],
        guard: Option<&ForeignKeyGuard>,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let mut outcome = ExecutionOutcome::default();
        if statements.is_empty() {
            outcome.success = true;
            return outcome;
        }

        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                outcome.errors.push(StatementError::message(e.to_string()));
                outcome.elapsed_ms = elapsed_ms(started);
                return outcome;
            }
        };

        let total = statements.len();
        for (i, statement) in statements.iter().enumerate() {
            let step = i + 1;
            self.before(step, total, statement, outcome.statements_executed, started);

            let statement_started = Instant::now();
            if let Err(e) = tx.execute(statement).await {
                let message = e.to_string();
                self.failed(step, total, statement, &message, outcome.statements_executed, started);
                let error = StatementError {
                    message,
                    statement: Some(statement.clone()),
                };
                return self.abort(tx, outcome, error, started).await;
            }

            outcome.statements_executed += 1;
            outcome.executed.push(statement.clone());
            self.after(step, total, statement, outcome.statements_executed, started, statement_started);
        }

        if let Some(guard) = guard {
            let error = match tx.query(&guard.check).await {
                Ok(violations) if violations.is_empty() => None,
                Ok(violations) => Some(violation_error(guard, &violations)),
                Err(e) => Some(StatementError {
                    message: e.to_string(),
                    statement: Some(guard.check.clone()),
                }),
            };
            if let Some(error) = error {
                return self.abort(tx, outcome, error, started).await;
            }
        }

        if let Err(e) = tx.commit().await {
            outcome.errors.push(StatementError::message(e.to_string()));
            outcome.statements_executed = 0;
            outcome.executed.clear();
            outcome.elapsed_ms = elapsed_ms(started);
            return outcome;
        }

        outcome.success = true;
        outcome.elapsed_ms = elapsed_ms(started);
        outcome
    }

    /// Roll back after `error`. Nothing executed so far persists.
    async fn abort(
        &self,
        mut tx: Box<dyn Transaction>,
        mut outcome: ExecutionOutcome,
        error: StatementError,
        started: Instant,
    ) -> ExecutionOutcome {
        let message = error.message.clone();
        outcome.errors.push(error);
        if let Err(rollback_error) = tx.rollback().await {
            outcome
                .errors
                .push(StatementError::message(rollback_error.to_string()));
        }
        self.observer
            .on_event(&MigrationEvent::TransactionRolledBack { error: message });
        outcome.statements_executed = 0;
        outcome.executed.clear();
        outcome.elapsed_ms = elapsed_ms(started);
        outcome
    }

    async fn run_best_effort(
        &self,
        statements: &[String],
        guard: Option<&ForeignKeyGuard>,
    ) -> ExecutionOutcome {
        let started = Instant::now();
        let mut outcome = ExecutionOutcome::default();
        let total = statements.len();

        for (i, statement) in statements.iter().enumerate() {
            if self.stop.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                outcome.stopped = true;
                self.observer.on_event(&MigrationEvent::ExecutionStopped {
                    executed: outcome.statements_executed,
                    remaining: total - i,
                });
                break;
            }

            let step = i + 1;
            self.before(step, total, statement, outcome.statements_executed, started);

            let statement_started = Instant::now();
            match self.db.execute(statement).await {
                Ok(()) => {
                    outcome.statements_executed += 1;
                    outcome.executed.push(statement.clone());
                    self.after(step, total, statement, outcome.statements_executed, started, statement_started);
                }
                Err(e) => {
                    let message = e.to_string();
                    self.failed(step, total, statement, &message, outcome.statements_executed, started);
                    outcome.errors.push(StatementError {
                        message,
                        statement: Some(statement.clone()),
                    });
                }
            }
        }

        // Statements stay applied; the check can only report.
        if let Some(guard) = guard {
            match self.db.query(&guard.check).await {
                Ok(violations) if violations.is_empty() => {}
                Ok(violations) => outcome.errors.push(violation_error(guard, &violations)),
                Err(e) => outcome.errors.push(StatementError {
                    message: e.to_string(),
                    statement: Some(guard.check.clone()),
                }),
            }
        }

        outcome.success = outcome.errors.is_empty() && !outcome.stopped;
        outcome.elapsed_ms = elapsed_ms(started);
        outcome
    }

    fn before(&self, step: usize, total: usize, statement: &str, executed: usize, started: Instant) {
        self.observer.on_event(&MigrationEvent::StatementStarted {
            step,
            total,
            statement: statement.to_string(),
        });
        self.report(step - 1, step, total, statement, executed, started, ProgressPhase::Executing);
    }

    fn after(
        &self,
        step: usize,
        total: usize,
        statement: &str,
        executed: usize,
        started: Instant,
        statement_started: Instant,
    ) {
        self.observer.on_event(&MigrationEvent::StatementCompleted {
            step,
            total,
            elapsed_ms: elapsed_ms(statement_started),
        });
        self.report(step, step, total, statement, executed, started, ProgressPhase::Completed);
    }

    fn failed(
        &self,
        step: usize,
        total: usize,
        statement: &str,
        error: &str,
        executed: usize,
        started: Instant,
    ) {
        self.observer.on_event(&MigrationEvent::StatementFailed {
            step,
            statement: statement.to_string(),
            error: error.to_string(),
        });
        self.report(step, step, total, statement, executed, started, ProgressPhase::Failed);
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        done: usize,
        step: usize,
        total: usize,
        statement: &str,
        executed: usize,
        started: Instant,
        phase: ProgressPhase,
    ) {
        let Some(callback) = self.progress else {
            return;
        };
        let percent_complete = if total == 0 {
            100.0
        } else {
            (done as f64 / total as f64 * 100.0).round()
        };
        callback(&MigrationProgress {
            current_step: step,
            total_steps: total,
            current_operation: shorten(statement),
            percent_complete,
            time_elapsed_ms: elapsed_ms(started),
            statements_executed: executed,
            phase,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{CollectingObserver, NoopObserver};
    use crate::testing::MemoryDatabase;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    fn statements() -> Vec<String> {
        vec![
            "CREATE TABLE \"a\" (\"id\" integer)".to_string(),
            "CREATE TABLE \"b\" (\"id\" integer)".to_string(),
            "CREATE TABLE \"c\" (\"id\" integer)".to_string(),
        ]
    }

    #[tokio::test]
    async fn test_transactional_success() {
        let db = MemoryDatabase::new();
        let outcome = Executor::new(&db, &NoopObserver, ExecutionMode::Transactional)
            .run(&statements())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.statements_executed, 3);
        assert_eq!(db.committed(), statements());
    }

    #[tokio::test]
    async fn test_transactional_failure_rolls_back() {
        let db = MemoryDatabase::new();
        db.fail_on("\"b\"", "table b is cursed");
        let observer = CollectingObserver::new();

        let outcome = Executor::new(&db, &observer, ExecutionMode::Transactional)
            .run(&statements())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.statements_executed, 0);
        assert!(outcome.executed.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].statement.as_deref(), Some(statements()[1].as_str()));
        assert!(db.committed().is_empty());
        assert!(
            observer
                .events()
                .iter()
                .any(|e| matches!(e, MigrationEvent::TransactionRolledBack { .. }))
        );
    }

    #[tokio::test]
    async fn test_best_effort_continues_past_failures() {
        let db = MemoryDatabase::new();
        db.fail_on("\"b\"", "table b is cursed");

        let outcome = Executor::new(&db, &NoopObserver, ExecutionMode::BestEffort)
            .run(&statements())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.statements_executed, 2);
        assert_eq!(outcome.executed, vec![statements()[0].clone(), statements()[2].clone()]);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_flag_halts_best_effort_between_statements() {
        let db = MemoryDatabase::new();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let callback = move |p: &MigrationProgress| {
            if p.phase == ProgressPhase::Completed && p.current_step == 1 {
                flag.store(true, Ordering::SeqCst);
            }
        };

        let outcome = Executor::new(&db, &NoopObserver, ExecutionMode::BestEffort)
            .with_progress(Some(&callback))
            .with_stop_flag(Some(stop))
            .run(&statements())
            .await;

        assert!(outcome.stopped);
        assert!(!outcome.success);
        assert_eq!(outcome.statements_executed, 1);
        assert_eq!(db.executed(), vec![statements()[0].clone()]);
    }

    #[tokio::test]
    async fn test_progress_reports_before_and_after() {
        let db = MemoryDatabase::new();
        let reports = Mutex::new(Vec::new());
        let callback = |p: &MigrationProgress| {
            reports
                .lock()
                .push((p.current_step, p.percent_complete, p.phase, p.statements_executed));
        };

        let outcome = Executor::new(&db, &NoopObserver, ExecutionMode::Transactional)
            .with_progress(Some(&callback))
            .run(&statements()[..2])
            .await;
        assert!(outcome.success);

        assert_eq!(
            reports.into_inner(),
            vec![
                (1, 0.0, ProgressPhase::Executing, 0),
                (1, 50.0, ProgressPhase::Completed, 1),
                (2, 50.0, ProgressPhase::Executing, 1),
                (2, 100.0, ProgressPhase::Completed, 2),
            ]
        );
    }

    fn sqlite_guard() -> ForeignKeyGuard {
        use crate::ddl::{DdlGenerator, SqliteDdl};
        SqliteDdl.foreign_key_guard().unwrap()
    }

    fn enforcing(db: &MemoryDatabase) {
        db.respond("PRAGMA foreign_keys", vec![serde_json::json!({"foreign_keys": 1})]);
    }

    #[tokio::test]
    async fn test_guard_suspends_enforcement_around_the_transaction() {
        let db = MemoryDatabase::new();
        enforcing(&db);
        let guard = sqlite_guard();
        let observer = CollectingObserver::new();

        let outcome = Executor::new(&db, &observer, ExecutionMode::Transactional)
            .with_foreign_key_guard(Some(&guard))
            .run(&statements())
            .await;

        assert!(outcome.success, "{:?}", outcome.errors);
        assert_eq!(outcome.statements_executed, 3);
        let mut expected = vec![guard.disable.clone()];
        expected.extend(statements());
        expected.push(guard.enable.clone());
        assert_eq!(db.executed(), expected);

        let events = observer.events();
        let suspended = events
            .iter()
            .position(|e| matches!(e, MigrationEvent::ForeignKeysSuspended))
            .unwrap();
        let restored = events
            .iter()
            .position(|e| matches!(e, MigrationEvent::ForeignKeysRestored))
            .unwrap();
        assert!(suspended < restored);
    }

    #[tokio::test]
    async fn test_dangling_references_roll_back_and_restore_enforcement() {
        let db = MemoryDatabase::new();
        enforcing(&db);
        db.respond(
            "PRAGMA foreign_key_check",
            vec![
                serde_json::json!({"table": "Post", "rowid": 1, "parent": "Author", "fkid": 0}),
                serde_json::json!({"table": "Post", "rowid": 2, "parent": "Author", "fkid": 0}),
            ],
        );
        let guard = sqlite_guard();
        let observer = CollectingObserver::new();

        let outcome = Executor::new(&db, &observer, ExecutionMode::Transactional)
            .with_foreign_key_guard(Some(&guard))
            .run(&statements())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.statements_executed, 0);
        assert!(db.committed().is_empty());
        assert_eq!(
            outcome.errors,
            vec![StatementError {
                message: "Foreign key check failed: 2 dangling reference(s) in [Post]".into(),
                statement: Some(guard.check.clone()),
            }]
        );
        assert_eq!(db.executed(), vec![guard.disable.clone(), guard.enable.clone()]);
        assert!(
            observer
                .events()
                .iter()
                .any(|e| matches!(e, MigrationEvent::TransactionRolledBack { .. }))
        );
    }

    #[tokio::test]
    async fn test_guard_leaves_disabled_enforcement_alone() {
        let db = MemoryDatabase::new();
        db.respond("PRAGMA foreign_keys", vec![serde_json::json!({"foreign_keys": 0})]);
        let guard = sqlite_guard();

        let outcome = Executor::new(&db, &NoopObserver, ExecutionMode::Transactional)
            .with_foreign_key_guard(Some(&guard))
            .run(&statements())
            .await;

        assert!(outcome.success);
        assert_eq!(db.executed(), statements());
    }

    #[tokio::test]
    async fn test_best_effort_reports_dangling_references() {
        let db = MemoryDatabase::new();
        enforcing(&db);
        db.respond(
            "PRAGMA foreign_key_check",
            vec![serde_json::json!({"table": "Post", "rowid": 7, "parent": "Author", "fkid": 0})],
        );
        let guard = sqlite_guard();

        let outcome = Executor::new(&db, &NoopObserver, ExecutionMode::BestEffort)
            .with_foreign_key_guard(Some(&guard))
            .run(&statements())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.statements_executed, 3);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].statement.as_deref(), Some(guard.check.as_str()));
        assert_eq!(db.executed().last(), Some(&guard.enable));
    }

    #[tokio::test]
    async fn test_guard_is_skipped_for_empty_runs() {
        let db = MemoryDatabase::new();
        enforcing(&db);
        let guard = sqlite_guard();

        let outcome = Executor::new(&db, &NoopObserver, ExecutionMode::Transactional)
            .with_foreign_key_guard(Some(&guard))
            .run(&[])
            .await;

        assert!(outcome.success);
        assert!(db.executed().is_empty());
    }

    #[test]
    fn test_operation_is_shortened() {
        let long = format!("CREATE TABLE \"t\" ({})", "x int, ".repeat(20));
        let short = shorten(&long);
        assert_eq!(short.chars().count(), 53);
        assert!(short.ends_with("..."));
        assert_eq!(shorten("DROP TABLE \"t\""), "DROP TABLE \"t\"");
    }
}
