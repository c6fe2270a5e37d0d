//! Advisory locking between engines that share one database file.

mod common;

use std::time::Duration;

use common::*;
use reconcile::migrate::{MigrationConfig, MigrationError, MigrationEvent};
use reconcile::sqlite::{SqliteConfig, SqliteDatabase};

async fn two_handles(path: &std::path::Path) -> (SqliteDatabase, SqliteDatabase) {
    let first = SqliteDatabase::open(SqliteConfig::file(path)).await.unwrap();
    let second = SqliteDatabase::open(SqliteConfig::file(path)).await.unwrap();
    (first, second)
}

#[tokio::test]
async fn test_held_lock_blocks_other_engine() {
    let dir = tempfile::tempdir().unwrap();
    let (first, second) = two_handles(&dir.path().join("locks.db")).await;
    let config = MigrationConfig::default();
    let (holder, _) = engine_for(&first, config.clone());
    let (contender, observer) = engine_for(&second, config.clone());

    let lock = holder.acquire_lock(&config.lock_scope, 60_000).await.unwrap();
    assert!(contender.is_locked(Some(&config.lock_scope)).await);

    let err = contender.apply(&sqlite_schema([account()])).await.unwrap_err();
    assert!(matches!(err, MigrationError::LockContention(_)));
    assert!(err.is_recoverable());
    assert!(table_names(&second).await.is_empty());
    assert!(
        observer
            .events()
            .iter()
            .any(|e| matches!(e, MigrationEvent::LockContended { .. }))
    );

    holder.release_lock(&lock).await;
    assert!(!contender.is_locked(None).await);
    let result = contender.apply(&sqlite_schema([account()])).await.unwrap();
    assert!(result.success, "{:?}", result.errors);
}

#[tokio::test]
async fn test_expired_lock_is_taken_over() {
    let dir = tempfile::tempdir().unwrap();
    let (first, second) = two_handles(&dir.path().join("expiry.db")).await;
    let config = MigrationConfig::default();
    let (holder, _) = engine_for(&first, config.clone());
    let (contender, _) = engine_for(&second, config.clone());

    // Never released.
    let _abandoned = holder.acquire_lock(&config.lock_scope, 10).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!contender.is_locked(Some(&config.lock_scope)).await);
    let result = contender.apply(&sqlite_schema([account()])).await.unwrap();
    assert!(result.success, "{:?}", result.errors);
    assert!(!holder.is_locked(None).await);
}

#[tokio::test]
async fn test_locks_are_scoped_by_id() {
    let (_db, engine) = memory_engine().await;
    let lock = engine.acquire_lock("reporting", 60_000).await.unwrap();

    assert!(engine.is_locked(Some("reporting")).await);
    assert!(!engine.is_locked(Some("billing")).await);
    assert!(engine.acquire_lock("billing", 60_000).await.is_ok());
    assert!(matches!(
        engine.acquire_lock("reporting", 60_000).await,
        Err(MigrationError::LockContention(id)) if id == "reporting"
    ));

    engine.release_lock(&lock).await;
    assert!(!engine.is_locked(Some("reporting")).await);
}
