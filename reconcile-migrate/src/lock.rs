//! Row-based advisory locking.
//!
//! Separate processes coordinate through a lock table: a live row for a
//! migration id means someone else is migrating. Rows carry their own expiry
//! so a crashed holder never blocks forever.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use crate::clock::{Clock, IdGenerator};
use crate::database::{Database, Filter, Row, row_str};
use crate::dialect::Dialect;
use crate::error::{MigrateResult, MigrationError};
use crate::events::{MigrationEvent, MigrationObserver};
use crate::history::{format_timestamp, parse_timestamp};

/// Latest expiry that survives the round trip through an RFC 3339 column.
fn latest_expiry() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationLock {
    /// Lock row id, `lock_<key>_<ms>`.
    pub id: String,
    /// Owner token, `<pid>_<ms>`. Only the owner can release.
    pub process_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// The key that was locked.
    pub migration_id: String,
}

impl MigrationLock {
    fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), json!(self.id));
        row.insert("processId".into(), json!(self.process_id));
        row.insert("acquiredAt".into(), json!(format_timestamp(self.acquired_at)));
        row.insert("expiresAt".into(), json!(format_timestamp(self.expires_at)));
        row.insert("migrationId".into(), json!(self.migration_id));
        row
    }
}

/// Acquires and releases lock rows.
pub struct LockManager<'a> {
    db: &'a dyn Database,
    table: &'a str,
    dialect: Dialect,
    clock: &'a dyn Clock,
    ids: &'a dyn IdGenerator,
    observer: &'a dyn MigrationObserver,
}

impl<'a> LockManager<'a> {
    /// A manager over `table`.
    pub fn new(
        db: &'a dyn Database,
        table: &'a str,
        dialect: Dialect,
        clock: &'a dyn Clock,
        ids: &'a dyn IdGenerator,
        observer: &'a dyn MigrationObserver,
    ) -> Self {
        Self {
            db,
            table,
            dialect,
            clock,
            ids,
            observer,
        }
    }

    /// Create the lock table when missing.
    pub async fn ensure_table(&self) -> MigrateResult<()> {
        let q = |c: &str| self.dialect.quote(c);
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({} varchar(255) NOT NULL PRIMARY KEY, {} varchar(255) NOT NULL, {} varchar(64) NOT NULL, {} varchar(64) NOT NULL, {} varchar(255) NOT NULL UNIQUE)",
            q(self.table),
            q("id"),
            q("processId"),
            q("acquiredAt"),
            q("expiresAt"),
            q("migrationId"),
        );
        self.db.execute(&sql).await
    }

    /// Take the lock for `migration_id`, expiring `timeout_ms` from now.
    ///
    /// Fails with [`MigrationError::LockContention`] while a live lock for the
    /// same id exists. Never retries.
    pub async fn acquire(&self, migration_id: &str, timeout_ms: u64) -> MigrateResult<MigrationLock> {
        self.ensure_table()
            .await
            .map_err(|e| MigrationError::lock_failed(e.to_string()))?;
        self.purge_expired().await;

        if self
            .live_lock_exists(Some(migration_id))
            .await
            .map_err(|e| MigrationError::lock_failed(e.to_string()))?
        {
            return Err(self.contended(migration_id));
        }

        let now = self.clock.now();
        let timeout = i64::try_from(timeout_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .unwrap_or(Duration::MAX);
        let lock = MigrationLock {
            id: self.ids.generate(&format!("lock_{migration_id}")),
            process_id: format!("{}_{}", std::process::id(), now.timestamp_millis()),
            acquired_at: now,
            expires_at: now
                .checked_add_signed(timeout)
                .map_or_else(latest_expiry, |at| at.min(latest_expiry())),
            migration_id: migration_id.to_string(),
        };

        if let Err(e) = self.db.insert(self.table, lock.to_row()).await {
            // Lost a race with another process between the check and the insert.
            if self.live_lock_exists(Some(migration_id)).await.unwrap_or(false) {
                return Err(self.contended(migration_id));
            }
            return Err(MigrationError::lock_failed(e.to_string()));
        }

        self.observer.on_event(&MigrationEvent::LockAcquired {
            lock_id: lock.id.clone(),
            migration_id: lock.migration_id.clone(),
        });
        Ok(lock)
    }

    /// Remove a lock this process created. Failures are reported as events
    /// and otherwise ignored; the row expires on its own.
    pub async fn release(&self, lock: &MigrationLock) {
        let filters = [
            Filter::eq("id", lock.id.as_str()),
            Filter::eq("processId", lock.process_id.as_str()),
        ];
        match self.db.delete(self.table, &filters).await {
            Ok(_) => self.observer.on_event(&MigrationEvent::LockReleased {
                lock_id: lock.id.clone(),
            }),
            Err(e) => self.observer.on_event(&MigrationEvent::LockReleaseFailed {
                lock_id: lock.id.clone(),
                error: e.to_string(),
            }),
        }
    }

    /// Whether a live lock exists, for one id or for any.
    ///
    /// A failed check reads as unlocked.
    pub async fn is_locked(&self, migration_id: Option<&str>) -> bool {
        if let Err(e) = self.ensure_table().await {
            self.observer.on_event(&MigrationEvent::LockCheckFailed {
                error: e.to_string(),
            });
            return false;
        }
        self.purge_expired().await;
        match self.live_lock_exists(migration_id).await {
            Ok(locked) => locked,
            Err(e) => {
                self.observer.on_event(&MigrationEvent::LockCheckFailed {
                    error: e.to_string(),
                });
                false
            }
        }
    }

    async fn purge_expired(&self) {
        let now = format_timestamp(self.clock.now());
        if let Err(e) = self
            .db
            .delete(self.table, &[Filter::lt("expiresAt", now)])
            .await
        {
            self.observer.on_event(&MigrationEvent::ExpiredLockPurgeFailed {
                error: e.to_string(),
            });
        }
    }

    /// Rows whose expiry already passed never count, even if the purge failed.
    async fn live_lock_exists(&self, migration_id: Option<&str>) -> MigrateResult<bool> {
        let filters: Vec<Filter> = migration_id
            .map(|id| vec![Filter::eq("migrationId", id)])
            .unwrap_or_default();
        let now = self.clock.now();
        let rows = self.db.select(self.table, &filters).await?;
        Ok(rows.iter().any(|row| {
            row_str(row, "expiresAt").is_some_and(|raw| parse_timestamp(&raw) >= now)
        }))
    }

    fn contended(&self, migration_id: &str) -> MigrationError {
        self.observer.on_event(&MigrationEvent::LockContended {
            migration_id: migration_id.to_string(),
        });
        MigrationError::LockContention(migration_id.to_string())
    }
}
