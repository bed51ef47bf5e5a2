use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bb8::{ManageConnection, Pool, PooledConnection};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;
use tracing::debug;

use crate::error::DbxError;

use super::connection::run_blocking;
use super::database::SqliteDatabase;

/// A rusqlite connection shared with `spawn_blocking` workers.
pub type SharedSqliteConnection = Arc<SqliteHandle>;

/// A pooled connection plus the handle that interrupts its running statement.
///
/// The interrupt handle is usable while a worker holds the connection lock.
pub struct SqliteHandle {
    conn: Mutex<rusqlite::Connection>,
    interrupt: rusqlite::InterruptHandle,
}

impl SqliteHandle {
    #[must_use]
    pub fn new(conn: rusqlite::Connection) -> Self {
        let interrupt = conn.get_interrupt_handle();
        Self {
            conn: Mutex::new(conn),
            interrupt,
        }
    }

    #[must_use]
    pub fn connection(&self) -> &Mutex<rusqlite::Connection> {
        &self.conn
    }

    #[must_use]
    pub fn interrupt_handle(&self) -> &rusqlite::InterruptHandle {
        &self.interrupt
    }
}
pub type SqlitePooledConnection = PooledConnection<'static, SqliteManager>;

const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Options for opening a `SQLite` database pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteOptions {
    pub db_path: String,
    pub max_connections: u32,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Switch file databases to WAL journaling when connections open.
    pub wal: bool,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            wal: true,
        }
    }
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            ..Self::default()
        }
    }

    /// A private in-memory database.
    ///
    /// Every `SQLite` connection to `:memory:` sees its own database, so the
    /// pool is limited to a single connection. A transaction then holds the
    /// only connection until it finishes.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            max_connections: 1,
            wal: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    fn validate(&self) -> Result<(), DbxError> {
        if self.db_path.is_empty() {
            return Err(DbxError::ConfigError("db_path is required".to_string()));
        }
        if self.max_connections == 0 {
            return Err(DbxError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`SqliteOptions`].
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.opts.max_connections = max_connections;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.opts.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Open the pool.
    ///
    /// # Errors
    /// Returns `DbxError` if the options are invalid or the first connection cannot be opened.
    pub async fn build(self) -> Result<SqliteDatabase, DbxError> {
        SqliteDatabase::new(self.finish()).await
    }
}

/// bb8 manager for rusqlite connections.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    db_path: String,
    busy_timeout: Duration,
    wal: bool,
}

impl SqliteManager {
    #[must_use]
    pub fn new(opts: &SqliteOptions) -> Self {
        Self {
            db_path: opts.db_path.clone(),
            busy_timeout: opts.busy_timeout(),
            wal: opts.wal,
        }
    }

    /// Build a pool from `opts`.
    ///
    /// # Errors
    /// Returns `DbxError` if the options are invalid or opening a connection fails.
    pub async fn build_pool(opts: &SqliteOptions) -> Result<Pool<SqliteManager>, DbxError> {
        opts.validate()?;
        Pool::builder()
            .max_size(opts.max_connections)
            .build(SqliteManager::new(opts))
            .await
    }
}

impl ManageConnection for SqliteManager {
    type Connection = SharedSqliteConnection;
    type Error = DbxError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let manager = self.clone();
        async move {
            let conn = spawn_blocking(move || -> Result<rusqlite::Connection, DbxError> {
                let conn = rusqlite::Connection::open(&manager.db_path)?;
                conn.busy_timeout(manager.busy_timeout)?;
                if manager.wal {
                    let mode: String =
                        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
                    debug!(db_path = %manager.db_path, journal_mode = %mode, "opened sqlite connection");
                }
                Ok(conn)
            })
            .await
            .map_err(|e| {
                DbxError::ConnectionError(format!("sqlite connect join error: {e}"))
            })??;
            Ok(Arc::new(SqliteHandle::new(conn)))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let handle = Arc::clone(conn);
        async move {
            run_blocking(handle, |guard| {
                // A transaction leaked back into the pool makes the connection unusable.
                if !guard.is_autocommit() {
                    return Err(DbxError::ConnectionError(
                        "sqlite connection returned to pool inside a transaction".into(),
                    ));
                }
                guard.execute_batch("SELECT 1")?;
                Ok(())
            })
            .await
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let opts = SqliteOptionsBuilder::new("app.db".into())
            .max_connections(3)
            .busy_timeout(Duration::from_millis(250))
            .wal(false)
            .finish();
        assert_eq!(opts.db_path, "app.db");
        assert_eq!(opts.max_connections, 3);
        assert_eq!(opts.busy_timeout(), Duration::from_millis(250));
        assert!(!opts.wal);
    }

    #[test]
    fn rejects_empty_pool() {
        let opts = SqliteOptionsBuilder::new("app.db".into())
            .max_connections(0)
            .finish();
        assert!(matches!(opts.validate(), Err(DbxError::ConfigError(_))));
    }

    #[test]
    fn deserializes_with_defaults() {
        let opts: SqliteOptions = serde_json::from_str(r#"{"db_path":"x.db"}"#).expect("parse");
        assert_eq!(opts.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(opts.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert!(opts.wal);
    }
}
