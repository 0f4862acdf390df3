//! Repository error taxonomy.

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("order not found")]
    OrderNotFound,
    #[error("position not found")]
    PositionNotFound,
    #[error("stale version: expected {expected}, row is at {actual}")]
    StaleVersion { expected: i64, actual: i64 },
    #[error("transient storage error: {0}")]
    Transient(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl RepositoryError {
    /// Heuristic used by the retry helper: only connection-level failures
    /// are worth retrying, matching the Python repository's distinction
    /// between `PostgresConnectionError`/`TooManyConnectionsError` and
    /// everything else.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Transient(_))
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                RepositoryError::Transient(err.to_string())
            }
            _ => RepositoryError::Storage(err.to_string()),
        }
    }
}
