//! # Database Pool Management
//!
//! Connection pool creation and configuration for SQLite, and the
//! [`Database`] handle that hands out repositories and engines.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  DbConfig::new(path) ──► Database::new(config).await                    │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌─────────────────────────────────────────┐                            │
//! │  │            SqlitePool (WAL)              │                            │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐        │  (max_connections)         │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...    │                            │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘        │                            │
//! │  └─────────────────────────────────────────┘                            │
//! │                               │                                         │
//! │   db.stock()  db.sales()  db.debts()  db.returns()  db.transfers() ...  │
//! │   each mutating call = one transaction, bounded by operation_timeout    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::LocationCache;
use crate::engine::returns::ReturnEngine;
use crate::engine::sale::SaleEngine;
use crate::engine::settlement::SettlementEngine;
use crate::engine::stock::StockLedger;
use crate::engine::transfer::TransferEngine;
use crate::error::{DbError, DbResult};
use crate::idempotency::IdempotencyGuard;
use crate::migrations;
use crate::repository::customer::CustomerRepository;
use crate::repository::history::HistoryRepository;
use crate::repository::location::LocationRepository;
use crate::repository::product::ProductRepository;
use crate::repository::user::UserRepository;

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/meridian/meridian.db")
///     .max_connections(8)
///     .operation_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// Upper bound on one whole business transaction.
    /// Default: 10 seconds
    pub operation_timeout: Duration,

    /// SQLite busy_timeout: how long a statement waits on a locked database.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// How long the location list stays cached.
    /// Default: 300 seconds
    pub location_cache_ttl: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            operation_timeout: Duration::from_secs(10),
            busy_timeout: Duration::from_secs(5),
            location_cache_ttl: Duration::from_secs(300),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn location_cache_ttl(mut self, ttl: Duration) -> Self {
        self.location_cache_ttl = ttl;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// A single connection, since every `:memory:` connection is its own
    /// database.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            operation_timeout: Duration::from_secs(10),
            busy_timeout: Duration::from_secs(1),
            location_cache_ttl: Duration::from_secs(300),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Operation Timeout
// =============================================================================

/// Runs a transactional future under the operation timeout.
///
/// On expiry the future is dropped, which drops its open transaction and rolls
/// it back; the caller sees [`DbError::Timeout`] and nothing is applied.
pub(crate) async fn with_timeout<T, F>(limit: Duration, op: &'static str, fut: F) -> DbResult<T>
where
    F: Future<Output = DbResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation = op, timeout_secs = limit.as_secs(), "Operation timed out, rolled back");
            Err(DbError::Timeout {
                seconds: limit.as_secs(),
            })
        }
    }
}

/// Opens a write transaction.
///
/// `BEGIN IMMEDIATE` takes the write lock up front. Concurrent writers then
/// queue on `busy_timeout` instead of failing when a deferred read
/// transaction tries to upgrade after another writer committed.
pub(crate) async fn begin_write(pool: &SqlitePool) -> DbResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Runs the body of a write transaction under the operation timeout and
/// commits it afterwards.
///
/// The deadline covers everything up to `COMMIT`. A body that times out is
/// dropped with its transaction and rolled back. A commit, once issued, runs
/// to completion, so `Timeout` always means nothing was applied.
pub(crate) async fn commit_within<T, F>(limit: Duration, op: &'static str, body: F) -> DbResult<T>
where
    F: Future<Output = DbResult<(Transaction<'static, Sqlite>, T)>>,
{
    let (tx, value) = with_timeout(limit, op, body).await?;
    tx.commit().await?;
    Ok(value)
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository and engine access.
///
/// Cheap to clone; axum state holds one.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    operation_timeout: Duration,
    locations_cache: Arc<LocationCache>,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite: WAL, NORMAL synchronous, foreign keys, busy timeout
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // SQLite has them disabled by default
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            operation_timeout_secs = config.operation_timeout.as_secs(),
            "Database pool created"
        );

        let db = Database {
            pool,
            operation_timeout: config.operation_timeout,
            locations_cache: Arc::new(LocationCache::new(config.location_cache_ttl)),
        };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    // ----- Repositories -----

    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone(), self.operation_timeout)
    }

    pub fn customers(&self) -> CustomerRepository {
        CustomerRepository::new(self.pool.clone(), self.operation_timeout)
    }

    /// Location registry; `list()` is served from the shared cache.
    pub fn locations(&self) -> LocationRepository {
        LocationRepository::new(
            self.pool.clone(),
            self.operation_timeout,
            Arc::clone(&self.locations_cache),
        )
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.pool.clone())
    }

    pub fn history(&self) -> HistoryRepository {
        HistoryRepository::new(self.pool.clone())
    }

    pub fn idempotency(&self) -> IdempotencyGuard {
        IdempotencyGuard::new(self.pool.clone())
    }

    // ----- Engines -----

    pub fn stock(&self) -> StockLedger {
        StockLedger::new(self.pool.clone(), self.operation_timeout)
    }

    pub fn transfers(&self) -> TransferEngine {
        TransferEngine::new(self.pool.clone(), self.operation_timeout)
    }

    pub fn sales(&self) -> SaleEngine {
        SaleEngine::new(self.pool.clone(), self.operation_timeout)
    }

    pub fn debts(&self) -> SettlementEngine {
        SettlementEngine::new(self.pool.clone(), self.operation_timeout)
    }

    pub fn returns(&self) -> ReturnEngine {
        ReturnEngine::new(self.pool.clone(), self.operation_timeout)
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database can execute queries.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .operation_timeout(Duration::from_secs(3));

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.operation_timeout, Duration::from_secs(3));
        assert_eq!(config.location_cache_ttl, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_timeout_reports_timeout_error() {
        let result: DbResult<()> = with_timeout(Duration::from_millis(10), "sleepy", async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(DbError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_commit_within_applies_finished_body() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let saved: DbResult<i64> = commit_within(Duration::from_secs(5), "customer", async {
            let mut tx = begin_write(db.pool()).await?;
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO customers (name, created_at) VALUES ('Aziz', CURRENT_TIMESTAMP) RETURNING id",
            )
            .fetch_one(&mut *tx)
            .await?;
            Ok((tx, id))
        })
        .await;
        assert!(saved.is_ok());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_commit_within_timeout_applies_nothing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let result: DbResult<()> = commit_within(Duration::from_millis(20), "customer", async {
            let mut tx = begin_write(db.pool()).await?;
            sqlx::query("INSERT INTO customers (name, created_at) VALUES ('Aziz', CURRENT_TIMESTAMP)")
                .execute(&mut *tx)
                .await?;
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok((tx, ()))
        })
        .await;
        assert!(matches!(result, Err(DbError::Timeout { .. })));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
