//! Database lifecycle and schema migrations.

use crate::config::PersistenceConfig;
use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;
use std::time::Duration;

use super::Database;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        Self::connect(path, DEFAULT_BUSY_TIMEOUT).await
    }

    /// Open the database described by the persistence config
    pub async fn open(config: &PersistenceConfig) -> Result<Self> {
        Self::connect(&config.database_path, config.busy_timeout).await
    }

    async fn connect(path: &Path, busy_timeout: Duration) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        // Connect to database with foreign key enforcement and WAL mode
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };

        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        if current_version < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        Ok(())
    }

    /// Migration v1: jobs, units, checkpoints and runtime state
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        Self::in_transaction(conn, 1, |conn| {
            Box::pin(async move {
                Self::execute_ddl(
                    conn,
                    "jobs table",
                    r#"
                    CREATE TABLE jobs (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        source_ref TEXT NOT NULL,
                        object_key TEXT,
                        status TEXT NOT NULL,
                        status_message TEXT,
                        total_units INTEGER NOT NULL DEFAULT 0,
                        processed_units INTEGER NOT NULL DEFAULT 0,
                        failed_units INTEGER NOT NULL DEFAULT 0,
                        error_message TEXT,
                        graph_json TEXT,
                        created_at INTEGER NOT NULL,
                        updated_at INTEGER NOT NULL,
                        CHECK (processed_units <= total_units),
                        CHECK (failed_units <= processed_units)
                    )
                    "#,
                )
                .await?;

                Self::execute_ddl(
                    conn,
                    "jobs status index",
                    "CREATE INDEX idx_jobs_status ON jobs(status)",
                )
                .await?;

                Self::execute_ddl(
                    conn,
                    "units table",
                    r#"
                    CREATE TABLE units (
                        job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                        unit_index INTEGER NOT NULL,
                        id TEXT NOT NULL,
                        title TEXT NOT NULL,
                        text TEXT NOT NULL,
                        status INTEGER NOT NULL DEFAULT 0,
                        retries INTEGER NOT NULL DEFAULT 0,
                        error_message TEXT,
                        result_json TEXT,
                        started_at INTEGER,
                        completed_at INTEGER,
                        PRIMARY KEY (job_id, unit_index)
                    )
                    "#,
                )
                .await?;

                Self::execute_ddl(
                    conn,
                    "units status index",
                    "CREATE INDEX idx_units_status ON units(job_id, status)",
                )
                .await?;

                Self::execute_ddl(
                    conn,
                    "checkpoints table",
                    r#"
                    CREATE TABLE checkpoints (
                        key TEXT PRIMARY KEY,
                        job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                        stage TEXT NOT NULL,
                        last_processed_index INTEGER NOT NULL,
                        data TEXT NOT NULL,
                        updated_at INTEGER NOT NULL
                    )
                    "#,
                )
                .await?;

                Self::execute_ddl(
                    conn,
                    "runtime_state table",
                    r#"
                    CREATE TABLE runtime_state (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL,
                        updated_at INTEGER NOT NULL
                    )
                    "#,
                )
                .await?;

                Ok(())
            })
        })
        .await?;

        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    /// Migration v2: stream queue tables
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v2");

        Self::in_transaction(conn, 2, |conn| {
            Box::pin(async move {
                Self::execute_ddl(
                    conn,
                    "stream_entries table",
                    r#"
                    CREATE TABLE stream_entries (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        stream TEXT NOT NULL,
                        payload TEXT NOT NULL,
                        created_at INTEGER NOT NULL
                    )
                    "#,
                )
                .await?;

                Self::execute_ddl(
                    conn,
                    "stream_entries index",
                    "CREATE INDEX idx_stream_entries_stream ON stream_entries(stream, id)",
                )
                .await?;

                Self::execute_ddl(
                    conn,
                    "stream_groups table",
                    r#"
                    CREATE TABLE stream_groups (
                        stream TEXT NOT NULL,
                        group_name TEXT NOT NULL,
                        last_delivered_id INTEGER NOT NULL DEFAULT 0,
                        created_at INTEGER NOT NULL,
                        PRIMARY KEY (stream, group_name)
                    )
                    "#,
                )
                .await?;

                Self::execute_ddl(
                    conn,
                    "stream_pending table",
                    r#"
                    CREATE TABLE stream_pending (
                        stream TEXT NOT NULL,
                        group_name TEXT NOT NULL,
                        entry_id INTEGER NOT NULL REFERENCES stream_entries(id) ON DELETE CASCADE,
                        consumer TEXT NOT NULL,
                        delivered_at_ms INTEGER NOT NULL,
                        delivery_count INTEGER NOT NULL DEFAULT 1,
                        PRIMARY KEY (stream, group_name, entry_id)
                    )
                    "#,
                )
                .await?;

                Self::execute_ddl(
                    conn,
                    "stream_pending idle index",
                    "CREATE INDEX idx_stream_pending_idle ON stream_pending(stream, group_name, delivered_at_ms)",
                )
                .await?;

                Self::execute_ddl(
                    conn,
                    "stream_dead_letters table",
                    r#"
                    CREATE TABLE stream_dead_letters (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        stream TEXT NOT NULL,
                        group_name TEXT NOT NULL,
                        entry_id INTEGER NOT NULL,
                        payload TEXT NOT NULL,
                        reason TEXT NOT NULL,
                        delivery_count INTEGER NOT NULL,
                        failed_at INTEGER NOT NULL
                    )
                    "#,
                )
                .await?;

                Ok(())
            })
        })
        .await?;

        tracing::info!("Database migration v2 complete");
        Ok(())
    }

    /// Run `body` inside BEGIN/COMMIT and record `version`, rolling back on any failure
    async fn in_transaction<F>(conn: &mut SqliteConnection, version: i32, body: F) -> Result<()>
    where
        F: for<'c> FnOnce(
            &'c mut SqliteConnection,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<()>> + Send + 'c>,
        >,
    {
        // Wrap migration in a transaction so partial failures don't leave the DB in a broken state
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            body(&mut *conn).await?;
            Self::record_migration(conn, version).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v{}: {}",
                            version, e
                        )))
                    })?;
                Ok(())
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn execute_ddl(conn: &mut SqliteConnection, what: &str, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create {}: {}",
                what, e
            )))
        })?;
        Ok(())
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration v{}: {}",
                    version, e
                )))
            })?;
        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
