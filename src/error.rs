use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbxError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    /// Starting a new transaction failed; nothing was begun, nothing to roll back.
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] Box<DbxError>),

    /// The operation succeeded but committing its transaction did not.
    #[error("failed to commit transaction: {0}")]
    Commit(#[source] Box<DbxError>),

    /// A carrier was strictly required but the context does not hold one.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The transaction handle was already committed or rolled back.
    #[error("transaction has already been committed or rolled back")]
    TransactionClosed,

    #[error("no rows in result set")]
    NoRows,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl DbxError {
    /// True for the two context-termination kinds.
    #[must_use]
    pub fn is_context_error(&self) -> bool {
        matches!(self, DbxError::Cancelled | DbxError::DeadlineExceeded)
    }
}
