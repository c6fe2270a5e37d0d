//! On-disk behavior of the SQLite handle.

use reconcile_migrate::{Database, Filter};
use reconcile_sqlite::{JournalMode, SqliteConfig, SqliteDatabase};
use serde_json::json;

#[tokio::test]
async fn test_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");

    {
        let db = SqliteDatabase::open(SqliteConfig::file(&path).journal_mode(JournalMode::Wal))
            .await
            .unwrap();
        db.execute("CREATE TABLE \"kv\" (\"id\" TEXT PRIMARY KEY, \"value\" TEXT)")
            .await
            .unwrap();
        let row = json!({"id": "a", "value": "1"}).as_object().cloned().unwrap();
        db.insert("kv", row).await.unwrap();
    }

    let url = format!("sqlite://{}", path.display());
    let db = SqliteDatabase::open(SqliteConfig::from_url(url).unwrap())
        .await
        .unwrap();
    let rows = db.select("kv", &[Filter::eq("id", "a")]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["value"], json!("1"));
}

#[tokio::test]
async fn test_two_handles_see_each_others_tables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");

    let first = SqliteDatabase::open(SqliteConfig::file(&path)).await.unwrap();
    let second = SqliteDatabase::open(SqliteConfig::file(&path)).await.unwrap();

    first
        .execute("CREATE TABLE \"t\" (\"id\" INTEGER PRIMARY KEY)")
        .await
        .unwrap();
    let names: Vec<String> = second
        .tables()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["t"]);
}

#[tokio::test]
async fn test_failed_statement_maps_to_database_error() {
    let db = SqliteDatabase::memory().await.unwrap();
    let err = db.execute("CREATE TABLE").await.unwrap_err();
    assert!(matches!(err, reconcile_migrate::MigrationError::Database(_)));
}
