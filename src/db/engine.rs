//! Pooled database engine with lifecycle safety rules.
//!
//! An [`Engine`] owns the pooled physical connections for one DSN. Reuse is
//! last-in-first-out so idle connections age toward recycling instead of
//! being kept artificially warm. Every connection is stamped with the id of
//! the process that created it; a checkout observing a foreign stamp poisons
//! the engine, because pooled native handles must never cross a process
//! boundary.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use super::connector::{Connection, Connector, DbError};

/// Role of an engine within the engine set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineRole {
    /// Accepts writes; flush and mutating statements land here.
    Primary,
    /// Read-only target for load-spread queries.
    Replica,
}

impl fmt::Display for EngineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Replica => write!(f, "replica"),
        }
    }
}

/// Pool sizing and lifecycle options for one engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Base number of pooled connections kept across checkouts.
    pub pool_size: usize,
    /// Extra connections allowed above `pool_size`; closed on release
    /// instead of pooled.
    pub max_overflow: usize,
    /// Idle age after which a pooled connection is discarded at checkout.
    pub recycle: Duration,
    /// Probe liveness before handing out a pooled connection.
    pub pre_ping: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            pool_size: 10,
            max_overflow: 10,
            recycle: Duration::from_secs(30),
            pre_ping: true,
        }
    }
}

/// Shared checkout counters, also referenced by live [`PooledConn`]s.
#[derive(Debug, Default)]
struct Counters {
    open: AtomicUsize,
    in_use: AtomicUsize,
}

/// An idle pooled connection awaiting reuse.
#[derive(Debug)]
struct IdleEntry {
    conn: Box<dyn Connection>,
    owner_pid: u32,
    released_at: Instant,
}

/// Point-in-time snapshot of an engine's pool.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Engine name (`primary-0`, `replica-1`, ...).
    pub name: String,
    /// Engine role.
    pub role: EngineRole,
    /// Base pool size.
    pub pool_size: usize,
    /// Overflow allowance above the base size.
    pub max_overflow: usize,
    /// Currently open physical connections (idle + checked out).
    pub open: usize,
    /// Currently checked-out connections.
    pub in_use: usize,
    /// Whether the engine refuses further checkouts.
    pub poisoned: bool,
}

impl PoolStatus {
    /// Connections sitting idle in the pool.
    #[must_use]
    pub const fn idle(&self) -> usize {
        self.open.saturating_sub(self.in_use)
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] open={} in_use={} idle={} size={} overflow={}{}",
            self.name,
            self.role,
            self.open,
            self.in_use,
            self.idle(),
            self.pool_size,
            self.max_overflow,
            if self.poisoned { " POISONED" } else { "" },
        )
    }
}

/// A pooled set of physical connections to one DSN.
///
/// Created once at startup, shared process-wide, destroyed at shutdown.
/// Checkout waits when `pool_size + max_overflow` connections are already
/// out.
#[derive(Debug)]
pub struct Engine {
    name: String,
    role: EngineRole,
    dsn: String,
    options: EngineOptions,
    connector: Arc<dyn Connector>,
    idle: Mutex<Vec<IdleEntry>>,
    capacity: Arc<Semaphore>,
    counters: Arc<Counters>,
    poisoned: AtomicBool,
}

impl Engine {
    /// Creates an engine for one DSN. No connection is opened until the
    /// first checkout.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        role: EngineRole,
        dsn: impl Into<String>,
        options: EngineOptions,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let capacity = options.pool_size + options.max_overflow;
        Self {
            name: name.into(),
            role,
            dsn: dsn.into(),
            options,
            connector,
            idle: Mutex::new(Vec::new()),
            capacity: Arc::new(Semaphore::new(capacity)),
            counters: Arc::new(Counters::default()),
            poisoned: AtomicBool::new(false),
        }
    }

    /// Returns the engine name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the engine role.
    #[must_use]
    pub const fn role(&self) -> EngineRole {
        self.role
    }

    /// Returns `true` once the engine has been poisoned.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Checks a connection out of the pool, waiting when all
    /// `pool_size + max_overflow` connections are in use.
    ///
    /// Reuse is LIFO: the most recently released connection is handed out
    /// first. Idle connections past the recycle age are discarded, dead
    /// ones (when `pre_ping` is on) likewise; a fresh connection is opened
    /// when no pooled one survives the checks.
    ///
    /// # Errors
    ///
    /// - [`DbError::ProcessIdentityViolation`] when a pooled connection was
    ///   created by another process. The engine is poisoned; the condition
    ///   is fatal and never retried.
    /// - [`DbError::PoolClosed`] when the engine is poisoned.
    /// - [`DbError::Backend`] when opening a fresh connection fails.
    pub async fn checkout(&self) -> Result<PooledConn, DbError> {
        if self.is_poisoned() {
            return Err(DbError::PoolClosed(self.name.clone()));
        }
        let permit = Arc::clone(&self.capacity)
            .acquire_owned()
            .await
            .map_err(|_| DbError::PoolClosed(self.name.clone()))?;
        let current = std::process::id();

        loop {
            let entry = { self.idle.lock().await.pop() };
            let Some(mut entry) = entry else {
                let conn = self.connector.connect(&self.dsn).await?;
                self.counters.open.fetch_add(1, Ordering::Relaxed);
                self.counters.in_use.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledConn {
                    engine: self.name.clone(),
                    conn: Some(conn),
                    owner_pid: current,
                    counters: Arc::clone(&self.counters),
                    _permit: permit,
                });
            };

            if entry.owner_pid != current {
                self.counters.open.fetch_sub(1, Ordering::Relaxed);
                self.poison();
                tracing::error!(
                    engine = %self.name,
                    owner = entry.owner_pid,
                    current,
                    "pooled connection crossed a process boundary; engine poisoned"
                );
                return Err(DbError::ProcessIdentityViolation {
                    engine: self.name.clone(),
                    owner: entry.owner_pid,
                    current,
                });
            }

            if entry.released_at.elapsed() >= self.options.recycle {
                self.counters.open.fetch_sub(1, Ordering::Relaxed);
                tracing::debug!(engine = %self.name, "recycling idle connection past its age window");
                continue;
            }

            if self.options.pre_ping {
                if let Err(err) = entry.conn.ping().await {
                    self.counters.open.fetch_sub(1, Ordering::Relaxed);
                    tracing::warn!(engine = %self.name, error = %err, "discarding dead idle connection");
                    continue;
                }
            }

            self.counters.in_use.fetch_add(1, Ordering::Relaxed);
            return Ok(PooledConn {
                engine: self.name.clone(),
                conn: Some(entry.conn),
                owner_pid: entry.owner_pid,
                counters: Arc::clone(&self.counters),
                _permit: permit,
            });
        }
    }

    /// Returns a connection to the pool.
    ///
    /// The connection is pooled LIFO while the base pool has room;
    /// overflow connections are closed instead. Returning to a poisoned
    /// engine closes the connection.
    pub async fn checkin(&self, mut pooled: PooledConn) {
        let Some(conn) = pooled.conn.take() else {
            return;
        };
        self.counters.in_use.fetch_sub(1, Ordering::Relaxed);
        if self.is_poisoned() {
            self.counters.open.fetch_sub(1, Ordering::Relaxed);
            return;
        }
        let mut idle = self.idle.lock().await;
        if idle.len() < self.options.pool_size {
            idle.push(IdleEntry {
                conn,
                owner_pid: pooled.owner_pid,
                released_at: Instant::now(),
            });
        } else {
            self.counters.open.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Takes a pool snapshot from the atomic counters.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            name: self.name.clone(),
            role: self.role,
            pool_size: self.options.pool_size,
            max_overflow: self.options.max_overflow,
            open: self.counters.open.load(Ordering::Relaxed),
            in_use: self.counters.in_use.load(Ordering::Relaxed),
            poisoned: self.is_poisoned(),
        }
    }

    /// Marks the engine unusable and fails all waiting checkouts.
    fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
        self.capacity.close();
    }

    /// Seeds the idle pool with a connection carrying an arbitrary owner
    /// stamp, standing in for a handle inherited across a fork.
    #[cfg(test)]
    pub(crate) async fn inject_idle(&self, conn: Box<dyn Connection>, owner_pid: u32) {
        self.counters.open.fetch_add(1, Ordering::Relaxed);
        self.idle.lock().await.push(IdleEntry {
            conn,
            owner_pid,
            released_at: Instant::now(),
        });
    }
}

/// A connection checked out of an [`Engine`].
///
/// Holds the capacity permit for its lifetime; dropping it without a
/// checkin releases the capacity and forgets the physical connection.
#[derive(Debug)]
pub struct PooledConn {
    engine: String,
    conn: Option<Box<dyn Connection>>,
    owner_pid: u32,
    counters: Arc<Counters>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConn {
    /// Returns the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Released`] when the connection has already been
    /// returned to its engine.
    pub fn connection(&mut self) -> Result<&mut dyn Connection, DbError> {
        match self.conn.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(DbError::Released(self.engine.clone())),
        }
    }

    /// Process id stamped when the physical connection was created.
    #[must_use]
    pub const fn owner_pid(&self) -> u32 {
        self.owner_pid
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if self.conn.is_some() {
            self.counters.open.fetch_sub(1, Ordering::Relaxed);
            self.counters.in_use.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Statement;
    use crate::db::testing::MemoryConnector;

    fn make_engine(connector: &Arc<MemoryConnector>, options: EngineOptions) -> Engine {
        Engine::new(
            "primary-0",
            EngineRole::Primary,
            "mem://primary-0",
            options,
            Arc::clone(connector) as Arc<dyn Connector>,
        )
    }

    #[tokio::test]
    async fn checkout_opens_lazily_and_reuses() {
        let connector = MemoryConnector::shared();
        let engine = make_engine(&connector, EngineOptions::default());
        assert_eq!(connector.connect_count(), 0);

        let conn = engine.checkout().await;
        let Ok(conn) = conn else {
            panic!("checkout failed");
        };
        assert_eq!(connector.connect_count(), 1);
        engine.checkin(conn).await;

        let again = engine.checkout().await;
        assert!(again.is_ok());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn reuse_is_lifo() {
        let connector = MemoryConnector::shared();
        let engine = make_engine(&connector, EngineOptions::default());

        let Ok(first) = engine.checkout().await else {
            panic!("checkout failed");
        };
        let Ok(second) = engine.checkout().await else {
            panic!("checkout failed");
        };
        engine.checkin(first).await;
        engine.checkin(second).await;

        // The freshest release (connection #2) must come back first.
        let Ok(mut reused) = engine.checkout().await else {
            panic!("checkout failed");
        };
        let stmt = Statement::new("SELECT 1");
        let _ = reused.connection().unwrap().execute(&stmt).await;
        let ops = connector.recorder().ops_for("mem://primary-0");
        assert!(
            ops.iter().any(|op| op == "exec#2 SELECT 1"),
            "expected LIFO reuse of connection 2, ops: {ops:?}"
        );
    }

    #[tokio::test]
    async fn overflow_connections_are_closed_on_release() {
        let connector = MemoryConnector::shared();
        let options = EngineOptions {
            pool_size: 1,
            max_overflow: 1,
            ..EngineOptions::default()
        };
        let engine = make_engine(&connector, options);

        let Ok(base) = engine.checkout().await else {
            panic!("checkout failed");
        };
        let Ok(overflow) = engine.checkout().await else {
            panic!("overflow checkout failed");
        };
        engine.checkin(base).await;
        engine.checkin(overflow).await;

        let status = engine.status();
        assert_eq!(status.open, 1, "overflow connection should be closed");
        assert_eq!(status.idle(), 1);
    }

    #[tokio::test]
    async fn checkout_waits_when_exhausted() {
        let connector = MemoryConnector::shared();
        let options = EngineOptions {
            pool_size: 1,
            max_overflow: 0,
            ..EngineOptions::default()
        };
        let engine = Arc::new(make_engine(&connector, options));

        let Ok(held) = engine.checkout().await else {
            panic!("checkout failed");
        };

        let waiter = Arc::clone(&engine);
        let pending = tokio::spawn(async move { waiter.checkout().await });

        let raced =
            tokio::time::timeout(Duration::from_millis(50), engine.checkout()).await;
        assert!(raced.is_err(), "checkout should wait while pool is exhausted");

        engine.checkin(held).await;
        let Ok(Ok(_conn)) = pending.await else {
            panic!("waiter should obtain the released connection");
        };
    }

    #[tokio::test]
    async fn recycle_discards_aged_connections() {
        let connector = MemoryConnector::shared();
        let options = EngineOptions {
            recycle: Duration::ZERO,
            ..EngineOptions::default()
        };
        let engine = make_engine(&connector, options);

        let Ok(conn) = engine.checkout().await else {
            panic!("checkout failed");
        };
        engine.checkin(conn).await;

        let again = engine.checkout().await;
        assert!(again.is_ok());
        assert_eq!(
            connector.connect_count(),
            2,
            "aged idle connection must be replaced by a fresh connect"
        );
    }

    #[tokio::test]
    async fn pre_ping_discards_dead_connections() {
        let connector = MemoryConnector::shared();
        let engine = make_engine(&connector, EngineOptions::default());

        let Ok(conn) = engine.checkout().await else {
            panic!("checkout failed");
        };
        engine.checkin(conn).await;

        connector.fail_pings(true);
        let again = engine.checkout().await;
        assert!(again.is_ok());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn foreign_process_stamp_is_fatal() {
        let connector = MemoryConnector::shared();
        let engine = make_engine(&connector, EngineOptions::default());

        let foreign = connector.connect("mem://primary-0").await.unwrap();
        let foreign_pid = std::process::id().wrapping_add(1);
        engine.inject_idle(foreign, foreign_pid).await;

        let result = engine.checkout().await;
        let Err(DbError::ProcessIdentityViolation { owner, current, .. }) = result else {
            panic!("expected a process identity violation");
        };
        assert_eq!(owner, foreign_pid);
        assert_eq!(current, std::process::id());
        assert!(engine.is_poisoned());

        // The engine must refuse any further checkout.
        let after = engine.checkout().await;
        assert!(matches!(after, Err(DbError::PoolClosed(_))));
    }

    #[test]
    fn status_formats_counters() {
        let status = PoolStatus {
            name: "replica-1".to_string(),
            role: EngineRole::Replica,
            pool_size: 10,
            max_overflow: 10,
            open: 3,
            in_use: 1,
            poisoned: false,
        };
        let line = status.to_string();
        assert!(line.contains("replica-1[replica]"));
        assert!(line.contains("idle=2"));
    }
}
