//! SQLite-backed credential store.
//!
//! Table:
//! - `api_keys`: id, exchange (unique via `unique_exchange`), api_key,
//!   api_secret, created_at, updated_at
//!
//! Every operation checks a connection out of an r2d2 pool on the blocking
//! thread pool and hands it back on drop, whether the operation succeeded or
//! not. Writes run inside an `IMMEDIATE` transaction; an error drops the
//! transaction, which rolls it back.

use super::error::StoreError;
use super::inspect::{inspect_schema, SchemaReport};
use super::models::{CredentialRecord, CredentialSubmission, UpsertOutcome};
use super::traits::CredentialStore;
use crate::config::DatabaseConfig;
use crate::observability::{Observer, ObserverEvent, StorageOp};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const TABLE_NAME: &str = "api_keys";
pub const UNIQUE_INDEX_NAME: &str = "unique_exchange";

/// Idempotent DDL. `AUTOINCREMENT` keeps ids from ever being reused.
pub const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS api_keys (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        exchange    TEXT NOT NULL,
        api_key     TEXT NOT NULL,
        api_secret  TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS unique_exchange ON api_keys(exchange);";

/// `created_at` is only written by the INSERT arm.
const UPSERT_SQL: &str = "
    INSERT INTO api_keys (exchange, api_key, api_secret, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?4)
    ON CONFLICT(exchange) DO UPDATE SET
        api_key    = excluded.api_key,
        api_secret = excluded.api_secret,
        updated_at = excluded.updated_at";

pub struct SqliteCredentialStore {
    pool: Pool<SqliteConnectionManager>,
    db_path: PathBuf,
    observer: Arc<dyn Observer>,
}

impl SqliteCredentialStore {
    /// Open (or create) the database file and build the connection pool.
    ///
    /// The pool connects eagerly, so an unreachable or unwritable database
    /// fails here rather than on the first request.
    pub fn open(config: &DatabaseConfig, observer: Arc<dyn Observer>) -> Result<Self, StoreError> {
        let db_path = config.resolved_path();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(&db_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            // WAL mode for concurrent reads + crash safety
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous  = NORMAL;",
            )
        });

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build(manager)?;

        tracing::debug!(path = %db_path.display(), "Opened credential database");

        Ok(Self {
            pool,
            db_path,
            observer,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn inspect_schema(&self) -> Result<SchemaReport, StoreError> {
        let result = self
            .with_conn(|conn| Ok(inspect_schema(conn)?))
            .await;
        self.report(StorageOp::Lookup, result)
    }

    /// Run `op` on a pooled connection off the async runtime.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            op(&mut *conn)
        })
        .await?
    }

    fn report<T>(&self, operation: StorageOp, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(e) = &result {
            self.observer.record_event(&ObserverEvent::StorageFailed {
                operation,
                detail: e.to_string(),
            });
        }
        result
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let result = self
            .with_conn(|conn| Ok(conn.execute_batch(SCHEMA_SQL)?))
            .await;
        self.report(StorageOp::EnsureSchema, result)
    }

    async fn upsert(&self, submission: &CredentialSubmission) -> Result<UpsertOutcome, StoreError> {
        let submission = submission.clone();
        let result = self
            .with_conn(move |conn| upsert_in_transaction(conn, &submission))
            .await;
        self.report(StorageOp::Upsert, result)
    }

    async fn get(&self, exchange: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let exchange = exchange.to_string();
        let result = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, exchange, api_key, api_secret, created_at, updated_at
                         FROM api_keys WHERE exchange = ?1",
                        params![exchange],
                        row_to_record,
                    )
                    .optional()?)
            })
            .await;
        self.report(StorageOp::Lookup, result)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let result = self
            .with_conn(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM api_keys", [], |row| row.get(0))?;
                Ok(u64::try_from(n).unwrap_or(0))
            })
            .await;
        self.report(StorageOp::Lookup, result)
    }

    async fn check_connectivity(&self) -> Result<(), StoreError> {
        let result = self
            .with_conn(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await;
        self.report(StorageOp::Connectivity, result)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

/// The timestamp is read only once the write lock is held, so commit order
/// and timestamp order agree.
fn upsert_in_transaction(
    conn: &mut Connection,
    submission: &CredentialSubmission,
) -> Result<UpsertOutcome, StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now = now_timestamp();

    let existed: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM api_keys WHERE exchange = ?1)",
        params![submission.exchange],
        |row| row.get(0),
    )?;

    tx.execute(
        UPSERT_SQL,
        params![
            submission.exchange,
            submission.api_key,
            submission.api_secret,
            now
        ],
    )?;

    tx.commit()?;

    Ok(if existed {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Created
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CredentialRecord> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(CredentialRecord {
        id: row.get(0)?,
        exchange: row.get(1)?,
        api_key: row.get(2)?,
        api_secret: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
        updated_at: parse_timestamp(5, &updated_at)?,
    })
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Microsecond precision so back-to-back writes still order.
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::recording::RecordingObserver;
    use crate::observability::NoopObserver;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir) -> DatabaseConfig {
        DatabaseConfig {
            path: Some(tmp.path().join("keys").join("trading_system.db")),
            ..DatabaseConfig::default()
        }
    }

    async fn test_store() -> (TempDir, SqliteCredentialStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteCredentialStore::open(&test_config(&tmp), Arc::new(NoopObserver)).unwrap();
        store.ensure_schema().await.unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn open_creates_parent_directory() {
        let (tmp, store) = test_store().await;
        assert!(tmp.path().join("keys").is_dir());
        assert!(store.db_path().ends_with("trading_system.db"));
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let (_tmp, store) = test_store().await;
        store.ensure_schema().await.unwrap();
        store.ensure_schema().await.unwrap();

        let report = store.inspect_schema().await.unwrap();
        assert!(report.is_healthy(), "{:?}", report.problems());
        assert_eq!(report.row_count, Some(0));
    }

    #[tokio::test]
    async fn first_submission_creates_record_with_equal_timestamps() {
        let (_tmp, store) = test_store().await;

        let outcome = store
            .upsert(&CredentialSubmission::new("binance", "k1", "s1"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);

        let record = store.get("binance").await.unwrap().unwrap();
        assert_eq!(record.api_key, "k1");
        assert_eq!(record.api_secret, "s1");
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn resubmission_overwrites_and_keeps_created_at() {
        let (_tmp, store) = test_store().await;

        store
            .upsert(&CredentialSubmission::new("binance", "k1", "s1"))
            .await
            .unwrap();
        let first = store.get("binance").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;

        let outcome = store
            .upsert(&CredentialSubmission::new("binance", "k2", "s2"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let second = store.get("binance").await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);
        assert_eq!(second.api_key, "k2");
        assert_eq!(second.api_secret, "s2");
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn identical_payload_twice_leaves_one_record() {
        let (_tmp, store) = test_store().await;
        let submission = CredentialSubmission::new("kraken", "same-key", "same-secret");

        store.upsert(&submission).await.unwrap();
        let first = store.get("kraken").await.unwrap().unwrap();
        store.upsert(&submission).await.unwrap();
        let second = store.get("kraken").await.unwrap().unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn exchanges_are_independent() {
        let (_tmp, store) = test_store().await;

        store
            .upsert(&CredentialSubmission::new("binance", "k1", "s1"))
            .await
            .unwrap();
        store
            .upsert(&CredentialSubmission::new("bybit", "k2", "s2"))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.get("binance").await.unwrap().unwrap().api_key, "k1");
        assert_eq!(store.get("bybit").await.unwrap().unwrap().api_key, "k2");
        assert!(store.get("okx").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_for_one_exchange_keep_a_single_row() {
        let (_tmp, store) = test_store().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert(&CredentialSubmission::new(
                        "binance",
                        format!("key-{i}"),
                        format!("secret-{i}"),
                    ))
                    .await
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().is_created() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.count().await.unwrap(), 1);
        let record = store.get("binance").await.unwrap().unwrap();
        assert!(record.updated_at >= record.created_at);
        let suffix = record.api_key.trim_start_matches("key-");
        assert_eq!(record.api_secret, format!("secret-{suffix}"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timestamps_are_taken_after_waiting_for_the_write_lock() {
        let (_tmp, store) = test_store().await;
        let store = Arc::new(store);

        let holder = Connection::open(store.db_path()).unwrap();
        holder.execute_batch("BEGIN IMMEDIATE").unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .upsert(&CredentialSubmission::new("binance", "k1", "s1"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        let released_at = parse_timestamp(0, &now_timestamp()).unwrap();
        holder.execute_batch("COMMIT").unwrap();

        assert_eq!(writer.await.unwrap().unwrap(), UpsertOutcome::Created);
        let record = store.get("binance").await.unwrap().unwrap();
        assert!(record.created_at >= released_at);
        assert_eq!(record.updated_at, record.created_at);
    }

    #[test]
    fn later_commit_never_carries_an_older_updated_at() {
        let tmp = TempDir::new().unwrap();
        let mut conn = Connection::open(tmp.path().join("keys.db")).unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();

        upsert_in_transaction(&mut conn, &CredentialSubmission::new("binance", "k1", "s1"))
            .unwrap();
        upsert_in_transaction(&mut conn, &CredentialSubmission::new("binance", "k2", "s2"))
            .unwrap();

        let record = conn
            .query_row(
                "SELECT id, exchange, api_key, api_secret, created_at, updated_at
                 FROM api_keys WHERE exchange = 'binance'",
                [],
                row_to_record,
            )
            .unwrap();
        assert_eq!(record.api_key, "k2");
        assert!(record.updated_at >= record.created_at);
    }

    #[tokio::test]
    async fn connectivity_check_succeeds_on_open_database() {
        let (_tmp, store) = test_store().await;
        store.check_connectivity().await.unwrap();
    }

    #[tokio::test]
    async fn failed_write_is_reported_and_returned() {
        let tmp = TempDir::new().unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let store = SqliteCredentialStore::open(&test_config(&tmp), observer.clone()).unwrap();

        // No ensure_schema: the table does not exist yet.
        let result = store
            .upsert(&CredentialSubmission::new("binance", "k1", "top-secret"))
            .await;
        assert!(matches!(result, Err(StoreError::Database(_))));

        let events = observer.events();
        assert!(matches!(
            events.as_slice(),
            [ObserverEvent::StorageFailed {
                operation: StorageOp::Upsert,
                ..
            }]
        ));
        assert!(!observer.rendered().contains("top-secret"));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        {
            let store = SqliteCredentialStore::open(&config, Arc::new(NoopObserver)).unwrap();
            store.ensure_schema().await.unwrap();
            store
                .upsert(&CredentialSubmission::new("binance", "k1", "s1"))
                .await
                .unwrap();
        }

        let store = SqliteCredentialStore::open(&config, Arc::new(NoopObserver)).unwrap();
        store.ensure_schema().await.unwrap();
        assert_eq!(store.get("binance").await.unwrap().unwrap().api_secret, "s1");
    }

    #[test]
    fn timestamps_round_trip_through_text() {
        let raw = now_timestamp();
        assert!(raw.ends_with('Z'));
        assert!(parse_timestamp(0, &raw).is_ok());
        assert!(parse_timestamp(0, "yesterday").is_err());
    }
}
