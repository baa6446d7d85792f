//! PostgreSQL implementation of the connector seam.
//!
//! One [`sqlx::PgConnection`] per pooled slot; pooling, recycling, and the
//! process-identity stamp are the engine's job, so the driver is used
//! unpooled here.

use async_trait::async_trait;
use sqlx::Connection as SqlxConnection;
use sqlx::Executor;
use sqlx::postgres::PgConnection;

use super::connector::{Connection, Connector, DbError};
use super::statement::Statement;

/// Opens plain `sqlx` PostgreSQL connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, dsn: &str) -> Result<Box<dyn Connection>, DbError> {
        let conn = PgConnection::connect(dsn)
            .await
            .map_err(|e| DbError::Backend(e.to_string()))?;
        Ok(Box::new(PgStoreConnection { conn }))
    }
}

/// A single live PostgreSQL connection.
#[derive(Debug)]
struct PgStoreConnection {
    conn: PgConnection,
}

#[async_trait]
impl Connection for PgStoreConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, DbError> {
        let result = self
            .conn
            .execute(statement.sql())
            .await
            .map_err(|e| DbError::Backend(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        self.conn
            .ping()
            .await
            .map_err(|e| DbError::Backend(e.to_string()))
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        self.conn
            .execute("BEGIN")
            .await
            .map(|_| ())
            .map_err(|e| DbError::Backend(e.to_string()))
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.conn
            .execute("COMMIT")
            .await
            .map(|_| ())
            .map_err(|e| DbError::Backend(e.to_string()))
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.conn
            .execute("ROLLBACK")
            .await
            .map(|_| ())
            .map_err(|e| DbError::Backend(e.to_string()))
    }
}
