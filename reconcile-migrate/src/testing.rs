//! In-memory [`Database`] double for unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::database::{Database, Filter, Row, TableMetadata, Transaction};
use crate::error::{MigrateResult, MigrationError};

/// Columns that must be unique in every bookkeeping table that has them.
const UNIQUE_COLUMNS: &[&str] = &["id", "migrationId"];

#[derive(Default)]
struct State {
    tables: Vec<TableMetadata>,
    responses: HashMap<String, Vec<Row>>,
    metadata_error: Option<String>,
    statement_failures: Vec<(String, String)>,
    write_failures: HashMap<String, String>,
    executed: Vec<String>,
    committed: Vec<String>,
    rows: HashMap<String, Vec<Row>>,
}

impl State {
    fn statement_failure(&self, sql: &str) -> Option<MigrationError> {
        self.statement_failures
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, message)| MigrationError::database(message.clone()))
    }

    fn write_failure(&self, table: &str) -> Option<MigrationError> {
        self.write_failures
            .get(table)
            .map(|message| MigrationError::database(message.clone()))
    }
}

/// Records DDL, answers canned catalog queries and keeps bookkeeping rows.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a table from `tables()`.
    pub fn add_table(&self, table: TableMetadata) {
        self.state.lock().tables.push(table);
    }

    /// Answer `sql` with `rows`. Unknown queries return no rows.
    pub fn respond(&self, sql: &str, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        self.state.lock().responses.insert(sql.trim().to_string(), rows);
    }

    /// Make `tables()` and `query()` fail.
    pub fn fail_metadata(&self, message: &str) {
        self.state.lock().metadata_error = Some(message.to_string());
    }

    /// Make any statement containing `pattern` fail.
    pub fn fail_on(&self, pattern: &str, message: &str) {
        self.state
            .lock()
            .statement_failures
            .push((pattern.to_string(), message.to_string()));
    }

    /// Make inserts and deletes against `table` fail.
    pub fn fail_writes(&self, table: &str, message: &str) {
        self.state
            .lock()
            .write_failures
            .insert(table.to_string(), message.to_string());
    }

    /// Undo `fail_on` and `fail_writes`.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.statement_failures.clear();
        state.write_failures.clear();
    }

    /// Statements that took effect: direct executes and committed transactions.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    /// Statements from committed transactions only.
    pub fn committed(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }

    /// Executed statements that are not bookkeeping DDL.
    pub fn migration_statements(&self) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|s| !s.contains("_reconcile_migration"))
            .collect()
    }

    /// Bookkeeping rows of `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state.lock().rows.get(table).cloned().unwrap_or_default()
    }
}

fn row_matches(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        let actual = row.get(filter.column()).unwrap_or(&Value::Null);
        match filter {
            Filter::Eq(_, expected) => actual == expected,
            Filter::Lt(_, bound) => match (actual, bound) {
                (Value::String(a), Value::String(b)) => a < b,
                (Value::Number(a), Value::Number(b)) => {
                    a.as_f64().unwrap_or(0.0) < b.as_f64().unwrap_or(0.0)
                }
                _ => false,
            },
        }
    })
}

#[async_trait::async_trait]
impl Database for MemoryDatabase {
    async fn tables(&self) -> MigrateResult<Vec<TableMetadata>> {
        let state = self.state.lock();
        if let Some(message) = &state.metadata_error {
            return Err(MigrationError::database(message.clone()));
        }
        Ok(state.tables.clone())
    }

    async fn query(&self, sql: &str) -> MigrateResult<Vec<Row>> {
        let state = self.state.lock();
        if let Some(message) = &state.metadata_error {
            return Err(MigrationError::database(message.clone()));
        }
        Ok(state.responses.get(sql.trim()).cloned().unwrap_or_default())
    }

    async fn execute(&self, sql: &str) -> MigrateResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.statement_failure(sql) {
            return Err(error);
        }
        state.executed.push(sql.to_string());
        Ok(())
    }

    async fn begin(&self) -> MigrateResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
        }))
    }

    async fn select(&self, table: &str, filters: &[Filter]) -> MigrateResult<Vec<Row>> {
        let state = self.state.lock();
        Ok(state
            .rows
            .get(table)
            .map(|rows| rows.iter().filter(|r| row_matches(r, filters)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, table: &str, row: Row) -> MigrateResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.write_failure(table) {
            return Err(error);
        }
        let rows = state.rows.entry(table.to_string()).or_default();
        for column in UNIQUE_COLUMNS {
            if let Some(value) = row.get(*column) {
                if rows.iter().any(|r| r.get(*column) == Some(value)) {
                    return Err(MigrationError::database(format!(
                        "UNIQUE constraint failed: {table}.{column}"
                    )));
                }
            }
        }
        rows.push(row);
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> MigrateResult<u64> {
        let mut state = self.state.lock();
        if let Some(error) = state.write_failure(table) {
            return Err(error);
        }
        let Some(rows) = state.rows.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !row_matches(r, filters));
        Ok((before - rows.len()) as u64)
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    pending: Vec<String>,
}

#[async_trait::async_trait]
impl Transaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        if let Some(error) = self.state.lock().statement_failure(sql) {
            return Err(error);
        }
        self.pending.push(sql.to_string());
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> MigrateResult<Vec<Row>> {
        let state = self.state.lock();
        Ok(state.responses.get(sql.trim()).cloned().unwrap_or_default())
    }

    async fn commit(&mut self) -> MigrateResult<()> {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut self.pending);
        state.executed.extend(pending.iter().cloned());
        state.committed.extend(pending);
        Ok(())
    }

    async fn rollback(&mut self) -> MigrateResult<()> {
        self.pending.clear();
        Ok(())
    }
}
