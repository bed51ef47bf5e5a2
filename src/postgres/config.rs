use std::future::Future;

use bb8::{ManageConnection, Pool, PooledConnection};
use serde::{Deserialize, Serialize};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

use crate::error::DbxError;

use super::database::PostgresDatabase;

pub type PgPooledConnection = PooledConnection<'static, PgManager>;

/// Connection settings for a Postgres pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub max_connections: u32,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            host: None,
            port: Some(5432),
            dbname: None,
            user: None,
            password: None,
            max_connections: 10,
        }
    }
}

impl PostgresOptions {
    /// Build the tokio-postgres config.
    ///
    /// # Errors
    /// Returns `DbxError::ConfigError` if host, dbname or user is missing.
    pub fn to_pg_config(&self) -> Result<tokio_postgres::Config, DbxError> {
        let host = required(self.host.as_deref(), "host")?;
        let dbname = required(self.dbname.as_deref(), "dbname")?;
        let user = required(self.user.as_deref(), "user")?;
        if self.max_connections == 0 {
            return Err(DbxError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }

        let mut cfg = tokio_postgres::Config::new();
        cfg.host(host).dbname(dbname).user(user);
        if let Some(port) = self.port {
            cfg.port(port);
        }
        if let Some(password) = &self.password {
            cfg.password(password);
        }
        Ok(cfg)
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, DbxError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DbxError::ConfigError(format!("{name} is required")))
}

/// Fluent builder for [`PostgresOptions`].
#[derive(Debug, Clone, Default)]
pub struct PostgresOptionsBuilder {
    opts: PostgresOptions,
}

impl PostgresOptionsBuilder {
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.opts.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.opts.port = Some(port);
        self
    }

    #[must_use]
    pub fn dbname(mut self, dbname: impl Into<String>) -> Self {
        self.opts.dbname = Some(dbname.into());
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.opts.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.opts.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.opts.max_connections = max_connections;
        self
    }

    #[must_use]
    pub fn finish(self) -> PostgresOptions {
        self.opts
    }

    /// Build the pool.
    ///
    /// # Errors
    /// Returns `DbxError` if the options are incomplete or pool creation fails.
    pub async fn build(self) -> Result<PostgresDatabase, DbxError> {
        PostgresDatabase::new(self.finish()).await
    }
}

/// bb8 manager for Postgres clients.
pub struct PgManager {
    pub(crate) config: tokio_postgres::Config,
}

impl PgManager {
    #[must_use]
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self { config }
    }

    /// Build a pool of at most `max_connections` clients.
    ///
    /// # Errors
    /// Returns `DbxError` if pool creation fails.
    pub async fn build_pool(self, max_connections: u32) -> Result<Pool<PgManager>, DbxError> {
        Pool::builder()
            .max_size(max_connections)
            .build(self)
            .await
            .map_err(|e| DbxError::ConnectionError(format!("postgres pool error: {e}")))
    }
}

impl ManageConnection for PgManager {
    type Connection = Client;
    type Error = tokio_postgres::Error;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let cfg = self.config.clone();
        async move {
            debug!(hosts = ?cfg.get_hosts(), db = ?cfg.get_dbname(), "postgres connect");
            let (client, connection) = cfg.connect(NoTls).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(error = %e, "postgres connection closed with error");
                }
            });
            Ok(client)
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move { conn.simple_query("SELECT 1").await.map(|_| ()) }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_closed()
    }
}
