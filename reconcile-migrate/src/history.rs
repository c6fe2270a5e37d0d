//! Migration history persistence.
//!
//! The history table is append-only. A row disappears only when a rollback of
//! exactly that migration succeeds.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::database::{Database, Filter, Row, row_bool, row_i64, row_str, row_string_list};
use crate::dialect::Dialect;
use crate::error::MigrateResult;
use crate::rollback::MigrationRollback;

/// Rolling 32-bit string hash over UTF-16 code units, rendered as signed hex.
///
/// Consistency check only; not collision resistant.
pub fn checksum(content: &str) -> String {
    let hash = content.encode_utf16().fold(0i32, |h, unit| {
        h.wrapping_shl(5).wrapping_sub(h).wrapping_add(i32::from(unit))
    });
    let magnitude = i64::from(hash).unsigned_abs();
    if hash < 0 {
        format!("-{magnitude:x}")
    } else {
        format!("{magnitude:x}")
    }
}

/// Checksum of an executed statement list.
pub fn statements_checksum(statements: &[String]) -> String {
    checksum(&statements.join("\n"))
}

/// Render a timestamp the way the bookkeeping tables store it.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp. Unreadable values sort as the epoch.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return at.with_timezone(&Utc);
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return naive.and_utc();
        }
    }
    DateTime::<Utc>::UNIX_EPOCH
}

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationHistoryEntry {
    pub id: String,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    #[serde(rename = "executionTime")]
    pub execution_time_ms: u64,
    pub success: bool,
}

/// A history entry with its statements and rollback plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedMigrationHistoryEntry {
    #[serde(flatten)]
    pub entry: MigrationHistoryEntry,
    pub statements: Vec<String>,
    pub dependencies: Vec<String>,
    pub schema_version: Option<String>,
    pub rollback: Option<MigrationRollback>,
}

/// Columns added after the first history layout, with their definitions.
const UPGRADE_COLUMNS: &[(&str, &str)] = &[
    ("statements", "text"),
    ("dependencies", "text"),
    ("schemaVersion", "varchar(64)"),
    ("rollbackStatements", "text"),
    ("rollbackChecksum", "varchar(64)"),
    ("canRollback", "boolean NOT NULL DEFAULT false"),
    ("rollbackWarnings", "text"),
];

/// Reads and writes the history table.
pub struct HistoryStore<'a> {
    db: &'a dyn Database,
    table: &'a str,
    dialect: Dialect,
}

impl<'a> HistoryStore<'a> {
    /// A store over `table`.
    pub fn new(db: &'a dyn Database, table: &'a str, dialect: Dialect) -> Self {
        Self { db, table, dialect }
    }

    /// Create the table when missing.
    pub async fn ensure_table(&self) -> MigrateResult<()> {
        let q = |c: &str| self.dialect.quote(c);
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({} varchar(255) NOT NULL PRIMARY KEY, {} varchar(255) NOT NULL, {} varchar(64) NOT NULL, {} varchar(64) NOT NULL, {} bigint NOT NULL DEFAULT 0, {} boolean NOT NULL DEFAULT true, {} text, {} text, {} varchar(64), {} text, {} varchar(64), {} boolean NOT NULL DEFAULT false, {} text)",
            q(self.table),
            q("id"),
            q("name"),
            q("checksum"),
            q("appliedAt"),
            q("executionTime"),
            q("success"),
            q("statements"),
            q("dependencies"),
            q("schemaVersion"),
            q("rollbackStatements"),
            q("rollbackChecksum"),
            q("canRollback"),
            q("rollbackWarnings"),
        );
        self.db.execute(&sql).await
    }

    /// Add columns missing from an older table layout. Returns what was added.
    pub async fn upgrade_table(&self) -> MigrateResult<Vec<String>> {
        self.ensure_table().await?;

        let existing: Vec<String> = self
            .db
            .tables()
            .await?
            .into_iter()
            .find(|t| t.name == self.table)
            .map(|t| t.columns.into_iter().map(|c| c.name).collect())
            .unwrap_or_default();

        let mut added = Vec::new();
        for (column, definition) in UPGRADE_COLUMNS {
            if existing.iter().any(|c| c == column) {
                continue;
            }
            self.db
                .execute(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    self.dialect.quote(self.table),
                    self.dialect.quote(column),
                    definition
                ))
                .await?;
            added.push((*column).to_string());
        }
        Ok(added)
    }

    /// Insert a row.
    pub async fn record(&self, entry: &EnhancedMigrationHistoryEntry) -> MigrateResult<()> {
        self.ensure_table().await?;
        self.db.insert(self.table, entry_to_row(entry)?).await
    }

    /// All entries, newest first.
    pub async fn list(&self) -> MigrateResult<Vec<MigrationHistoryEntry>> {
        Ok(self
            .list_enhanced()
            .await?
            .into_iter()
            .map(|e| e.entry)
            .collect())
    }

    /// All entries with statements and rollback data, newest first.
    pub async fn list_enhanced(&self) -> MigrateResult<Vec<EnhancedMigrationHistoryEntry>> {
        self.ensure_table().await?;
        let mut entries: Vec<_> = self
            .db
            .select(self.table, &[])
            .await?
            .iter()
            .filter_map(row_to_entry)
            .collect();
        entries.sort_by(|a, b| {
            b.entry
                .applied_at
                .cmp(&a.entry.applied_at)
                .then_with(|| b.entry.id.cmp(&a.entry.id))
        });
        Ok(entries)
    }

    /// One entry by id.
    pub async fn find(&self, id: &str) -> MigrateResult<Option<EnhancedMigrationHistoryEntry>> {
        self.ensure_table().await?;
        let rows = self.db.select(self.table, &[Filter::eq("id", id)]).await?;
        Ok(rows.iter().find_map(row_to_entry))
    }

    /// Delete an entry. Returns whether a row went away.
    pub async fn remove(&self, id: &str) -> MigrateResult<bool> {
        Ok(self.db.delete(self.table, &[Filter::eq("id", id)]).await? > 0)
    }
}

fn entry_to_row(entry: &EnhancedMigrationHistoryEntry) -> MigrateResult<Row> {
    let rollback = entry.rollback.as_ref();
    let value = json!({
        "id": entry.entry.id,
        "name": entry.entry.name,
        "checksum": entry.entry.checksum,
        "appliedAt": format_timestamp(entry.entry.applied_at),
        "executionTime": entry.entry.execution_time_ms,
        "success": entry.entry.success,
        "statements": serde_json::to_string(&entry.statements)?,
        "dependencies": serde_json::to_string(&entry.dependencies)?,
        "schemaVersion": entry.schema_version,
        "rollbackStatements": rollback
            .map(|r| serde_json::to_string(&r.rollback_statements))
            .transpose()?,
        "rollbackChecksum": rollback.map(|r| r.rollback_checksum.clone()),
        "canRollback": rollback.is_some_and(|r| r.can_rollback),
        "rollbackWarnings": rollback
            .map(|r| serde_json::to_string(&r.warnings))
            .transpose()?,
    });
    match value {
        Value::Object(row) => Ok(row),
        _ => Ok(Row::new()),
    }
}

fn row_to_entry(row: &Row) -> Option<EnhancedMigrationHistoryEntry> {
    let id = row_str(row, "id")?;
    let entry = MigrationHistoryEntry {
        name: row_str(row, "name").unwrap_or_default(),
        checksum: row_str(row, "checksum").unwrap_or_default(),
        applied_at: row_str(row, "appliedAt")
            .map(|raw| parse_timestamp(&raw))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        execution_time_ms: row_i64(row, "executionTime")
            .and_then(|ms| u64::try_from(ms).ok())
            .unwrap_or(0),
        success: row_bool(row, "success"),
        id: id.clone(),
    };

    let rollback_checksum = row_str(row, "rollbackChecksum");
    let rollback = rollback_checksum.map(|rollback_checksum| MigrationRollback {
        migration_id: id,
        rollback_statements: row_string_list(row, "rollbackStatements"),
        rollback_checksum,
        can_rollback: row_bool(row, "canRollback"),
        warnings: row_string_list(row, "rollbackWarnings"),
    });

    Some(EnhancedMigrationHistoryEntry {
        entry,
        statements: row_string_list(row, "statements"),
        dependencies: row_string_list(row, "dependencies"),
        schema_version: row_str(row, "schemaVersion"),
        rollback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollback::generate_rollback;
    use crate::testing::MemoryDatabase;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_checksum_values() {
        assert_eq!(checksum(""), "0");
        assert_eq!(checksum("a"), "61");
        assert_eq!(checksum("ab"), "c21");
        // Six characters are enough to wrap past i32::MAX.
        assert_eq!(checksum(&"z".repeat(6)), format!("-{:x}", 685_785_664));
        assert_eq!(checksum("same"), checksum("same"));
        assert_ne!(checksum("DROP TABLE a"), checksum("DROP TABLE b"));
    }

    #[test]
    fn test_statements_checksum_joins_with_newlines() {
        let statements = vec!["A".to_string(), "B".to_string()];
        assert_eq!(statements_checksum(&statements), checksum("A\nB"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-05-01T12:30:00.000Z"), expected);
        assert_eq!(parse_timestamp("2024-05-01 12:30:00"), expected);
        assert_eq!(parse_timestamp("yesterday"), DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(format_timestamp(expected), "2024-05-01T12:30:00.000Z");
    }

    fn entry(id: &str, minute: u32, success: bool) -> EnhancedMigrationHistoryEntry {
        let statements = vec![format!("CREATE TABLE \"{id}\" (x int)")];
        EnhancedMigrationHistoryEntry {
            entry: MigrationHistoryEntry {
                id: id.to_string(),
                name: format!("Migration {id}"),
                checksum: statements_checksum(&statements),
                applied_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
                execution_time_ms: 12,
                success,
            },
            rollback: Some(generate_rollback(id, &statements)),
            statements,
            dependencies: vec![],
            schema_version: Some("v1".into()),
        }
    }

    #[tokio::test]
    async fn test_record_and_list_newest_first() {
        let db = MemoryDatabase::new();
        let store = HistoryStore::new(&db, "_reconcile_migrations", Dialect::Sqlite);

        store.record(&entry("migration_1", 1, true)).await.unwrap();
        store.record(&entry("migration_3", 3, false)).await.unwrap();
        store.record(&entry("migration_2", 2, true)).await.unwrap();

        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["migration_3", "migration_2", "migration_1"]);

        let found = store.find("migration_2").await.unwrap().unwrap();
        assert_eq!(found, entry("migration_2", 2, true));
        assert!(found.rollback.unwrap().can_rollback);

        assert!(store.remove("migration_2").await.unwrap());
        assert!(!store.remove("migration_2").await.unwrap());
        assert!(store.find("migration_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ensure_table_statement() {
        let db = MemoryDatabase::new();
        let store = HistoryStore::new(&db, "history", Dialect::Postgres);
        store.ensure_table().await.unwrap();

        let executed = db.executed();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].starts_with(
            "CREATE TABLE IF NOT EXISTS \"history\" (\"id\" varchar(255) NOT NULL PRIMARY KEY"
        ));
        assert!(executed[0].contains("\"rollbackWarnings\" text"));
    }
}
