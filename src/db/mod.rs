//! Multi-engine database access and routing layer.
//!
//! This module owns the pooled [`Engine`]s built at startup, the per-task
//! [`Session`] unit-of-work, and the routing policy that decides which
//! engine each statement reaches. The connector seam keeps the physical
//! driver pluggable; [`postgres`] is the production implementation.

pub mod connector;
pub mod engine;
pub mod postgres;
pub mod router;
pub mod scoped;
pub mod session;
pub mod statement;

#[cfg(test)]
pub(crate) mod testing;

pub use connector::{Connection, Connector, DbError};
pub use engine::{Engine, EngineOptions, EngineRole, PoolStatus, PooledConn};
pub use postgres::PgConnector;
pub use router::{Engines, RandomStrategy, SelectionStrategy};
pub use scoped::{ScopedSessions, with_commit, with_session_scope};
pub use session::{BindContext, PrimaryGuard, Session};
pub use statement::{Statement, StatementKind};
