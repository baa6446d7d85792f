//! Per-task unit-of-work.
//!
//! A [`Session`] issues statements for exactly one task. The engine is
//! resolved lazily per statement; at most one connection is bound per
//! engine and kept until the session closes. Writes staged with
//! [`Session::add`] are persisted during flush, which pins routing to a
//! primary engine for the duration.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use super::connector::DbError;
use super::engine::{Engine, PooledConn};
use super::router::Engines;
use super::statement::Statement;
use crate::rpc::context::TaskId;

/// Per-task ambient routing state.
///
/// Owned by the session and cleared when it closes, so a reused task slot
/// never inherits a stale marker.
#[derive(Debug, Default)]
pub struct BindContext {
    force_primary: AtomicBool,
}

impl BindContext {
    /// Creates a cleared bind context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while primary routing is forced for this task.
    #[must_use]
    pub fn is_primary_forced(&self) -> bool {
        self.force_primary.load(Ordering::Acquire)
    }

    /// Sets the force-primary marker directly. Prefer
    /// [`BindContext::force_primary`], which scopes the marker to a call
    /// chain.
    pub fn set_forced(&self, forced: bool) {
        self.force_primary.store(forced, Ordering::Release);
    }

    /// Forces primary routing until the returned guard drops.
    ///
    /// Used to guarantee a read observes a just-completed write within the
    /// same logical operation.
    #[must_use = "primary routing is released when the guard drops"]
    pub fn force_primary(&self) -> PrimaryGuard<'_> {
        let prev = self.force_primary.swap(true, Ordering::AcqRel);
        PrimaryGuard { bind: self, prev }
    }
}

/// RAII scope for the force-primary marker.
#[derive(Debug)]
pub struct PrimaryGuard<'a> {
    bind: &'a BindContext,
    prev: bool,
}

impl Drop for PrimaryGuard<'_> {
    fn drop(&mut self) {
        self.bind.set_forced(self.prev);
    }
}

/// A connection bound to the session for one engine.
#[derive(Debug)]
struct Binding {
    engine: Arc<Engine>,
    conn: PooledConn,
    txn_open: bool,
}

#[derive(Debug, Default)]
struct SessionInner {
    bindings: Vec<Binding>,
    pending: Vec<Statement>,
    flushing: bool,
}

/// The unit-of-work for one task.
///
/// Statements execute in submission order under the session's internal
/// lock. The session is exclusively owned by its task; it must not be
/// handed to another concurrently running task.
#[derive(Debug)]
pub struct Session {
    task: TaskId,
    engines: Arc<Engines>,
    bind: BindContext,
    inner: Mutex<SessionInner>,
}

impl Session {
    /// Creates a unit-of-work bound to `task`.
    #[must_use]
    pub fn new(task: TaskId, engines: Arc<Engines>) -> Self {
        Self {
            task,
            engines,
            bind: BindContext::new(),
            inner: Mutex::new(SessionInner::default()),
        }
    }

    /// Returns the owning task identity.
    #[must_use]
    pub const fn task(&self) -> TaskId {
        self.task
    }

    /// Returns the session's bind context.
    #[must_use]
    pub fn bind(&self) -> &BindContext {
        &self.bind
    }

    /// Executes a statement on the engine the routing policy resolves.
    ///
    /// The first statement against an engine opens a transaction on the
    /// bound connection; the transaction stays open until
    /// [`Session::commit`], [`Session::rollback`], or close.
    ///
    /// # Errors
    ///
    /// Returns a [`DbError`] when routing, checkout, or execution fails.
    pub async fn execute(&self, statement: &Statement) -> Result<u64, DbError> {
        let mut inner = self.inner.lock().await;
        self.run_locked(&mut inner, statement).await
    }

    /// Stages a write to be persisted on the next flush.
    pub async fn add(&self, statement: Statement) {
        self.inner.lock().await.pending.push(statement);
    }

    /// Persists every staged write, routing to a primary engine.
    ///
    /// # Errors
    ///
    /// Returns the first [`DbError`] hit while executing staged writes;
    /// remaining staged writes are dropped (a rollback is expected next).
    pub async fn flush(&self) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        self.flush_locked(&mut inner).await
    }

    /// Flushes staged writes, then commits every open transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`DbError`] when the flush or any commit fails.
    pub async fn commit(&self) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        self.flush_locked(&mut inner).await?;
        for binding in &mut inner.bindings {
            if binding.txn_open {
                binding.conn.connection()?.commit().await?;
                binding.txn_open = false;
            }
        }
        Ok(())
    }

    /// Discards staged writes and rolls back every open transaction.
    ///
    /// # Errors
    ///
    /// Returns the first rollback failure after attempting every binding.
    pub async fn rollback(&self) -> Result<(), DbError> {
        let mut inner = self.inner.lock().await;
        inner.pending.clear();
        inner.flushing = false;
        let mut outcome = Ok(());
        for binding in &mut inner.bindings {
            if binding.txn_open {
                let result = match binding.conn.connection() {
                    Ok(conn) => conn.rollback().await,
                    Err(err) => Err(err),
                };
                binding.txn_open = false;
                if let Err(err) = result {
                    if outcome.is_ok() {
                        outcome = Err(err);
                    }
                }
            }
        }
        outcome
    }

    /// Disposes the unit-of-work: rolls back open transactions (best
    /// effort), returns every bound connection to its engine, and clears
    /// the force-primary marker.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.pending.clear();
        inner.flushing = false;
        let bindings = std::mem::take(&mut inner.bindings);
        drop(inner);
        for binding in bindings {
            let Binding {
                engine,
                mut conn,
                txn_open,
            } = binding;
            if txn_open {
                let result = match conn.connection() {
                    Ok(live) => live.rollback().await,
                    Err(err) => Err(err),
                };
                if let Err(err) = result {
                    tracing::warn!(
                        engine = %engine.name(),
                        error = %err,
                        "rollback while closing session failed"
                    );
                }
            }
            engine.checkin(conn).await;
        }
        self.bind.set_forced(false);
    }

    async fn flush_locked(&self, inner: &mut SessionInner) -> Result<(), DbError> {
        if inner.pending.is_empty() {
            return Ok(());
        }
        inner.flushing = true;
        let pending = std::mem::take(&mut inner.pending);
        let mut outcome = Ok(());
        for statement in &pending {
            if let Err(err) = self.run_locked(inner, statement).await {
                outcome = Err(err);
                break;
            }
        }
        inner.flushing = false;
        outcome
    }

    async fn run_locked(
        &self,
        inner: &mut SessionInner,
        statement: &Statement,
    ) -> Result<u64, DbError> {
        let engine = self.engines.resolve(inner.flushing, statement, &self.bind)?;
        let idx = match inner
            .bindings
            .iter()
            .position(|b| Arc::ptr_eq(&b.engine, &engine))
        {
            Some(idx) => idx,
            None => {
                let conn = engine.checkout().await?;
                inner.bindings.push(Binding {
                    engine: Arc::clone(&engine),
                    conn,
                    txn_open: false,
                });
                inner.bindings.len() - 1
            }
        };
        let Some(binding) = inner.bindings.get_mut(idx) else {
            return Err(DbError::Released(engine.name().to_string()));
        };
        if !binding.txn_open {
            binding.conn.connection()?.begin().await?;
            binding.txn_open = true;
        }
        binding.conn.connection()?.execute(statement).await
    }
}
