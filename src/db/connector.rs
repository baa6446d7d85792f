//! Connector seam between the engine pool and a physical database driver.
//!
//! [`Connector`] opens one physical connection per call; [`Connection`] is
//! the minimal surface a unit-of-work needs (execute, liveness probe,
//! transaction control). The production implementation lives in
//! [`crate::db::postgres`]; tests use an in-memory double.

use std::fmt;

use async_trait::async_trait;

use super::statement::Statement;

/// Errors surfaced by the database access layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The underlying driver failed; carries the driver's message only.
    #[error("backend error: {0}")]
    Backend(String),

    /// The engine set or pool was built from invalid parameters.
    #[error("invalid pool configuration: {0}")]
    Configuration(String),

    /// The engine refuses further checkouts (shut down or poisoned).
    #[error("engine `{0}` connection pool is closed")]
    PoolClosed(String),

    /// A pooled connection surfaced in a process other than the one that
    /// created it. Fatal: the engine is poisoned and never retried.
    #[error(
        "connection owned by process {owner} checked out in process {current} (engine `{engine}`)"
    )]
    ProcessIdentityViolation {
        /// Engine the connection belongs to.
        engine: String,
        /// Process id stamped at connect time.
        owner: u32,
        /// Process id observed at checkout time.
        current: u32,
    },

    /// The session was asked to use a connection it already released.
    #[error("connection already released back to engine `{0}`")]
    Released(String),
}

/// One physical database connection.
///
/// Implementations must execute statements in submission order and keep
/// transaction state (`begin`/`commit`/`rollback`) per connection.
#[async_trait]
pub trait Connection: Send + fmt::Debug {
    /// Executes a statement, returning the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Backend`] when the driver rejects the statement.
    async fn execute(&mut self, statement: &Statement) -> Result<u64, DbError>;

    /// Probes liveness before the pool hands the connection out again.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Backend`] when the connection is no longer usable.
    async fn ping(&mut self) -> Result<(), DbError>;

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Backend`] on driver failure.
    async fn begin(&mut self) -> Result<(), DbError>;

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Backend`] on driver failure.
    async fn commit(&mut self) -> Result<(), DbError>;

    /// Rolls back the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Backend`] on driver failure.
    async fn rollback(&mut self) -> Result<(), DbError>;
}

/// Opens physical connections for one DSN.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Opens a fresh physical connection to `dsn`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Backend`] when the endpoint is unreachable or
    /// rejects the connection.
    async fn connect(&self, dsn: &str) -> Result<Box<dyn Connection>, DbError>;
}
