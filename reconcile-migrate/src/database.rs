//! The database handle the engine consumes.
//!
//! Drivers implement [`Database`]; the engine never talks to a connection
//! any other way. Rows travel as JSON object maps so bookkeeping code stays
//! driver-agnostic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MigrateResult;

/// A row as column name to value.
pub type Row = serde_json::Map<String, Value>;

/// A condition for bookkeeping reads and deletes.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq(String, Value),
    /// `column < value`
    Lt(String, Value),
}

impl Filter {
    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(column.into(), value.into())
    }

    /// The filtered column.
    pub fn column(&self) -> &str {
        match self {
            Self::Eq(c, _) | Self::Lt(c, _) => c,
        }
    }

    /// The comparison value.
    pub fn value(&self) -> &Value {
        match self {
            Self::Eq(_, v) | Self::Lt(_, v) => v,
        }
    }
}

/// Table metadata as reported by the driver's generic introspection API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Table name.
    pub name: String,
    /// Whether this is a view.
    pub is_view: bool,
    /// Columns in ordinal order.
    pub columns: Vec<ColumnMetadata>,
}

/// Column metadata as reported by the driver's generic introspection API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Column name.
    pub name: String,
    /// Dialect-native type name.
    pub data_type: String,
    /// Whether NULL is allowed.
    pub is_nullable: bool,
    /// Whether the database assigns values automatically.
    pub is_auto_incrementing: bool,
    /// Whether a default is defined.
    pub has_default_value: bool,
    /// The default expression, when the driver can report it.
    pub default_value: Option<String>,
}

/// An already-connected database.
#[async_trait::async_trait]
pub trait Database: Send + Sync {
    /// Tables and views with their columns.
    async fn tables(&self) -> MigrateResult<Vec<TableMetadata>>;

    /// Run a raw read and return its rows.
    async fn query(&self, sql: &str) -> MigrateResult<Vec<Row>>;

    /// Run a raw statement.
    async fn execute(&self, sql: &str) -> MigrateResult<()>;

    /// Open a transaction.
    async fn begin(&self) -> MigrateResult<Box<dyn Transaction>>;

    /// Read rows from a bookkeeping table.
    async fn select(&self, table: &str, filters: &[Filter]) -> MigrateResult<Vec<Row>>;

    /// Insert one row into a bookkeeping table.
    async fn insert(&self, table: &str, row: Row) -> MigrateResult<()>;

    /// Delete matching rows from a bookkeeping table, returning how many went.
    async fn delete(&self, table: &str, filters: &[Filter]) -> MigrateResult<u64>;
}

/// A transaction scope. Must be finished with `commit` or `rollback`.
#[async_trait::async_trait]
pub trait Transaction: Send {
    /// Run a raw statement inside the transaction.
    async fn execute(&mut self, sql: &str) -> MigrateResult<()>;

    /// Run a raw query inside the transaction and return its rows.
    async fn query(&mut self, sql: &str) -> MigrateResult<Vec<Row>>;

    /// Commit everything executed so far.
    async fn commit(&mut self) -> MigrateResult<()>;

    /// Discard everything executed so far.
    async fn rollback(&mut self) -> MigrateResult<()>;
}

/// A column as a string. Numbers are rendered, nulls are absent.
pub fn row_str(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// A column as an integer, parsing strings when needed.
pub fn row_i64(row: &Row, column: &str) -> Option<i64> {
    match row.get(column)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// A column as a boolean. Drivers without a boolean type hand back 0/1 or text.
pub fn row_bool(row: &Row, column: &str) -> bool {
    match row.get(column) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "t"),
        _ => false,
    }
}

/// A JSON-array column as strings. Accepts arrays and JSON text.
pub fn row_string_list(row: &Row, column: &str) -> Vec<String> {
    let parsed;
    let value = match row.get(column) {
        Some(Value::String(s)) => {
            parsed = serde_json::from_str::<Value>(s).unwrap_or(Value::Null);
            &parsed
        }
        Some(v) => v,
        None => return vec![],
    };

    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filter_accessors() {
        let f = Filter::lt("expiresAt", "2024-01-01");
        assert_eq!(f.column(), "expiresAt");
        assert_eq!(f.value(), &json!("2024-01-01"));
    }

    #[test]
    fn test_row_helpers() {
        let r = row(json!({
            "name": "users",
            "count": "12",
            "flag": 1,
            "off": "false",
            "list": "[\"a\", \"b\"]",
            "arr": ["c"],
            "nothing": null
        }));

        assert_eq!(row_str(&r, "name").as_deref(), Some("users"));
        assert_eq!(row_str(&r, "flag").as_deref(), Some("1"));
        assert_eq!(row_str(&r, "nothing"), None);
        assert_eq!(row_i64(&r, "count"), Some(12));
        assert!(row_bool(&r, "flag"));
        assert!(!row_bool(&r, "off"));
        assert!(!row_bool(&r, "missing"));
        assert_eq!(row_string_list(&r, "list"), vec!["a", "b"]);
        assert_eq!(row_string_list(&r, "arr"), vec!["c"]);
        assert!(row_string_list(&r, "name").is_empty());
    }
}
