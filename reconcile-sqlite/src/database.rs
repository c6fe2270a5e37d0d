//! [`Database`] implementation over a single `tokio-rusqlite` connection.

use async_trait::async_trait;
use reconcile_migrate::{
    ColumnMetadata, Database, Filter, MigrateResult, Row, TableMetadata, Transaction,
};
use rusqlite::types::Value;
use tokio_rusqlite::Connection;
use tracing::{debug, trace};

use crate::config::SqliteConfig;
use crate::error::{SqliteError, SqliteResult};
use crate::types::{row_to_json, to_sqlite_value};

const LIST_TABLES: &str = "SELECT name, type FROM sqlite_master \
     WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name";

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// `WHERE` clause and parameters for bookkeeping filters.
fn where_clause(filters: &[Filter]) -> (String, Vec<Value>) {
    if filters.is_empty() {
        return (String::new(), Vec::new());
    }
    let conditions: Vec<String> = filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq(column, _) => format!("{} = ?", quote(column)),
            Filter::Lt(column, _) => format!("{} < ?", quote(column)),
        })
        .collect();
    let params = filters.iter().map(|f| to_sqlite_value(f.value())).collect();
    (format!(" WHERE {}", conditions.join(" AND ")), params)
}

fn read_rows(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
        row_to_json(row, &columns)
    })?;
    rows.collect()
}

fn read_columns(conn: &rusqlite::Connection, table: &str) -> rusqlite::Result<Vec<ColumnMetadata>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let rows = stmt.query_map([], |row| {
        let data_type: String = row.get("type")?;
        let not_null: i64 = row.get("notnull")?;
        let default_value: Option<String> = row.get("dflt_value")?;
        let pk: i64 = row.get("pk")?;
        let column = ColumnMetadata {
            name: row.get("name")?,
            is_nullable: not_null == 0 && pk == 0,
            is_auto_incrementing: pk == 1 && data_type.eq_ignore_ascii_case("integer"),
            has_default_value: default_value.is_some(),
            default_value,
            data_type,
        };
        Ok((column, pk))
    })?;
    let rows: Vec<(ColumnMetadata, i64)> = rows.collect::<rusqlite::Result<_>>()?;

    // Only a sole INTEGER primary key aliases the rowid.
    let composite = rows.iter().filter(|(_, pk)| *pk > 0).count() > 1;
    Ok(rows
        .into_iter()
        .map(|(mut column, _)| {
            column.is_auto_incrementing &= !composite;
            column
        })
        .collect())
}

/// A SQLite database the migration engine can drive.
///
/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Connection,
    config: SqliteConfig,
}

impl SqliteDatabase {
    /// Open a connection and apply the configured pragmas.
    pub async fn open(config: SqliteConfig) -> SqliteResult<Self> {
        let conn = match config.path.file() {
            None => Connection::open_in_memory().await?,
            Some(path) => Connection::open(path.to_path_buf()).await?,
        };

        let init_sql = config.init_sql();
        conn.call(move |conn| {
            conn.execute_batch(&init_sql)?;
            Ok(())
        })
        .await?;

        debug!(path = %config.path, "Opened SQLite database");
        Ok(Self { conn, config })
    }

    /// Open a private in-memory database.
    pub async fn memory() -> SqliteResult<Self> {
        Self::open(SqliteConfig::memory()).await
    }

    /// The configuration this handle was opened with.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run a statement and return the number of changed rows.
    pub async fn execute_params(&self, sql: &str, params: Vec<Value>) -> SqliteResult<usize> {
        let sql = sql.to_string();
        trace!(sql = %sql, "Executing parameterized statement");
        Ok(self
            .conn
            .call(move |conn| Ok(conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?))
            .await?)
    }

    /// Run a read with parameters.
    pub async fn query_params(&self, sql: &str, params: Vec<Value>) -> SqliteResult<Vec<Row>> {
        let sql = sql.to_string();
        trace!(sql = %sql, "Executing parameterized query");
        Ok(self
            .conn
            .call(move |conn| Ok(read_rows(conn, &sql, &params)?))
            .await?)
    }

    async fn execute_batch(&self, sql: &str) -> SqliteResult<()> {
        let sql = sql.to_string();
        debug!(sql = %sql, "Executing statement");
        Ok(self
            .conn
            .call(move |conn| Ok(conn.execute_batch(&sql)?))
            .await?)
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn tables(&self) -> MigrateResult<Vec<TableMetadata>> {
        let tables = self
            .conn
            .call(|conn| {
                let listed = read_rows(conn, LIST_TABLES, &[])?;
                let mut tables = Vec::with_capacity(listed.len());
                for row in listed {
                    let name = row.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                    let is_view = row.get("type").and_then(|v| v.as_str()) == Some("view");
                    let columns = read_columns(conn, &name)?;
                    tables.push(TableMetadata {
                        name,
                        is_view,
                        columns,
                    });
                }
                Ok(tables)
            })
            .await
            .map_err(SqliteError::from)?;
        Ok(tables)
    }

    async fn query(&self, sql: &str) -> MigrateResult<Vec<Row>> {
        Ok(self.query_params(sql, Vec::new()).await?)
    }

    async fn execute(&self, sql: &str) -> MigrateResult<()> {
        Ok(self.execute_batch(sql).await?)
    }

    async fn begin(&self) -> MigrateResult<Box<dyn Transaction>> {
        self.execute_batch("BEGIN").await?;
        Ok(Box::new(SqliteTransaction {
            db: self.clone(),
            open: true,
        }))
    }

    async fn select(&self, table: &str, filters: &[Filter]) -> MigrateResult<Vec<Row>> {
        let (clause, params) = where_clause(filters);
        let sql = format!("SELECT * FROM {}{clause}", quote(table));
        Ok(self.query_params(&sql, params).await?)
    }

    async fn insert(&self, table: &str, row: Row) -> MigrateResult<()> {
        if row.is_empty() {
            return Err(SqliteError::type_conversion("cannot insert an empty row").into());
        }
        let columns: Vec<String> = row.keys().map(|k| quote(k)).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let params = row.values().map(to_sqlite_value).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote(table),
            columns.join(", ")
        );
        self.execute_params(&sql, params).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> MigrateResult<u64> {
        let (clause, params) = where_clause(filters);
        let sql = format!("DELETE FROM {}{clause}", quote(table));
        let changed = self.execute_params(&sql, params).await?;
        Ok(changed as u64)
    }
}

/// A `BEGIN`..`COMMIT` scope on the shared connection.
///
/// Nothing else should use the connection while the transaction is open.
pub struct SqliteTransaction {
    db: SqliteDatabase,
    open: bool,
}

impl SqliteTransaction {
    async fn finish(&mut self, sql: &str) -> MigrateResult<()> {
        if !self.open {
            return Err(SqliteError::connection("transaction already finished").into());
        }
        self.open = false;
        Ok(self.db.execute_batch(sql).await?)
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str) -> MigrateResult<()> {
        if !self.open {
            return Err(SqliteError::connection("transaction already finished").into());
        }
        Ok(self.db.execute_batch(sql).await?)
    }

    async fn query(&mut self, sql: &str) -> MigrateResult<Vec<Row>> {
        if !self.open {
            return Err(SqliteError::connection("transaction already finished").into());
        }
        Ok(self.db.query_params(sql, Vec::new()).await?)
    }

    async fn commit(&mut self) -> MigrateResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> MigrateResult<()> {
        self.finish("ROLLBACK").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn db() -> SqliteDatabase {
        SqliteDatabase::memory().await.unwrap()
    }

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_where_clause() {
        let (clause, params) = where_clause(&[Filter::eq("id", "a"), Filter::lt("expiresAt", "b")]);
        assert_eq!(clause, " WHERE \"id\" = ? AND \"expiresAt\" < ?");
        assert_eq!(params, vec![Value::Text("a".into()), Value::Text("b".into())]);
        assert_eq!(where_clause(&[]).0, "");
    }

    #[tokio::test]
    async fn test_tables_reports_columns_and_views() {
        let db = db().await;
        db.execute("CREATE TABLE \"Post\" (\"id\" INTEGER PRIMARY KEY, \"title\" TEXT NOT NULL DEFAULT 'x', \"body\" TEXT)")
            .await
            .unwrap();
        db.execute("CREATE VIEW \"Titles\" AS SELECT \"title\" FROM \"Post\"")
            .await
            .unwrap();

        let tables = db.tables().await.unwrap();
        assert_eq!(tables.len(), 2);
        let post = &tables[0];
        assert_eq!(post.name, "Post");
        assert!(!post.is_view);
        assert_eq!(post.columns.len(), 3);
        assert!(post.columns[0].is_auto_incrementing);
        assert!(!post.columns[0].is_nullable);
        assert!(!post.columns[1].is_nullable);
        assert_eq!(post.columns[1].default_value.as_deref(), Some("'x'"));
        assert!(post.columns[2].is_nullable);
        assert!(tables[1].is_view);
    }

    #[tokio::test]
    async fn test_bookkeeping_rows() {
        let db = db().await;
        db.execute("CREATE TABLE \"locks\" (\"id\" TEXT PRIMARY KEY, \"expiresAt\" TEXT, \"ok\" BOOLEAN, \"tags\" TEXT)")
            .await
            .unwrap();

        db.insert("locks", row(json!({"id": "a", "expiresAt": "2024-01-01", "ok": true, "tags": ["x"]})))
            .await
            .unwrap();
        db.insert("locks", row(json!({"id": "b", "expiresAt": "2025-01-01", "ok": false, "tags": []})))
            .await
            .unwrap();
        assert!(db.insert("locks", row(json!({"id": "a"}))).await.is_err());

        let rows = db.select("locks", &[Filter::eq("id", "a")]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["ok"], json!(1));
        assert_eq!(rows[0]["tags"], json!(["x"]));

        let removed = db
            .delete("locks", &[Filter::lt("expiresAt", "2024-06-01")])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.select("locks", &[]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transaction_rollback_and_commit() {
        let db = db().await;

        let mut tx = db.begin().await.unwrap();
        tx.execute("CREATE TABLE \"a\" (\"id\" INTEGER)").await.unwrap();
        tx.rollback().await.unwrap();
        assert!(db.tables().await.unwrap().is_empty());
        assert!(tx.commit().await.is_err());

        let mut tx = db.begin().await.unwrap();
        tx.execute("CREATE TABLE \"b\" (\"id\" INTEGER)").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(db.tables().await.unwrap()[0].name, "b");
    }

    #[tokio::test]
    async fn test_transaction_sees_its_own_writes() {
        let db = db().await;
        db.execute("CREATE TABLE \"a\" (\"id\" INTEGER)").await.unwrap();

        let mut tx = db.begin().await.unwrap();
        tx.execute("INSERT INTO \"a\" VALUES (1)").await.unwrap();
        let rows = tx.query("SELECT count(*) AS n FROM \"a\"").await.unwrap();
        assert_eq!(rows[0]["n"], json!(1));
        assert!(tx.query("PRAGMA foreign_key_check").await.unwrap().is_empty());
        tx.rollback().await.unwrap();
        assert!(tx.query("SELECT 1").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_open_non_utf8_path_creates_that_file() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OsStr::from_bytes(b"app-\xff.db"));
        assert!(path.to_str().is_none());

        let db = SqliteDatabase::open(SqliteConfig::file(&path)).await.unwrap();
        db.execute("CREATE TABLE \"a\" (\"id\" INTEGER)").await.unwrap();
        assert!(path.exists());

        let reopened = SqliteDatabase::open(SqliteConfig::file(&path)).await.unwrap();
        assert_eq!(reopened.tables().await.unwrap()[0].name, "a");
    }

    #[tokio::test]
    async fn test_sqlite_version() {
        let db = db().await;
        let rows = db.query("select sqlite_version() as version").await.unwrap();
        assert!(rows[0]["version"].as_str().is_some_and(|v| v.starts_with('3')));
    }
}
