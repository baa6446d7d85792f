//! Task-scoped session registry and the commit/closure guarantees.
//!
//! [`ScopedSessions`] memoizes one [`Session`] per task identity, so every
//! access within a call observes the same unit-of-work. The wrappers layer
//! the two guarantees the call path relies on: [`with_commit`] ensures
//! commit-or-rollback, [`with_session_scope`] ensures disposal. The
//! cleanup hook built here is what the interceptor runs after every call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::connector::DbError;
use super::router::Engines;
use super::session::Session;
use crate::rpc::context::{CallContext, TaskId};
use crate::rpc::interceptor::CleanupHook;

/// Registry producing exactly one unit-of-work per task.
#[derive(Debug)]
pub struct ScopedSessions {
    engines: Arc<Engines>,
    slots: Mutex<HashMap<TaskId, Arc<Session>>>,
}

impl ScopedSessions {
    /// Creates an empty registry over the given engine set.
    #[must_use]
    pub fn new(engines: Arc<Engines>) -> Self {
        Self {
            engines,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the engine set sessions are routed over.
    #[must_use]
    pub fn engines(&self) -> &Arc<Engines> {
        &self.engines
    }

    /// Returns the task's unit-of-work, creating it on first access.
    ///
    /// Repeated access within the same task returns the same session.
    pub async fn get(&self, ctx: CallContext) -> Arc<Session> {
        let mut slots = self.slots.lock().await;
        let session = slots
            .entry(ctx.task())
            .or_insert_with(|| Arc::new(Session::new(ctx.task(), Arc::clone(&self.engines))));
        Arc::clone(session)
    }

    /// Disposes the task's unit-of-work, if any.
    ///
    /// The session rolls back open transactions, returns its connections,
    /// and clears its bind context, so a reused task slot starts clean.
    pub async fn dispose(&self, task: TaskId) {
        let removed = { self.slots.lock().await.remove(&task) };
        if let Some(session) = removed {
            session.close().await;
        }
    }

    /// Number of live units-of-work.
    pub async fn active(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Builds the post-call cleanup hook: disposes the task's session and
    /// logs a pool-status line at `log_rate` sampling.
    #[must_use]
    pub fn cleanup_hook(self: &Arc<Self>, log_rate: f64) -> CleanupHook {
        let sessions = Arc::clone(self);
        Arc::new(move |task: TaskId| {
            let sessions = Arc::clone(&sessions);
            Box::pin(async move {
                sessions.dispose(task).await;
                if rand::random::<f64>() < log_rate {
                    tracing::info!(
                        pools = %sessions.engines().status_summary(),
                        "connection pool status"
                    );
                }
            })
        })
    }
}

/// Runs `op` and commits the session on success, rolls back on failure.
///
/// The operation's own error propagates unchanged; a failing commit rolls
/// back and surfaces the commit error instead. No partial write survives a
/// failing operation.
///
/// # Errors
///
/// Returns `op`'s error verbatim, or the commit failure converted into `E`.
pub async fn with_commit<T, E, Fut>(session: &Session, op: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: From<DbError>,
{
    match op.await {
        Ok(value) => match session.commit().await {
            Ok(()) => Ok(value),
            Err(commit_err) => {
                if let Err(rb_err) = session.rollback().await {
                    tracing::error!(error = %rb_err, "rollback after failed commit also failed");
                }
                Err(E::from(commit_err))
            }
        },
        Err(err) => {
            if let Err(rb_err) = session.rollback().await {
                tracing::error!(error = %rb_err, "rollback after operation failure failed");
            }
            Err(err)
        }
    }
}

/// Runs `op` and disposes the task's unit-of-work afterwards, regardless
/// of outcome, so no session leaks onto a future reuse of the task slot.
pub async fn with_session_scope<T, Fut>(sessions: &ScopedSessions, task: TaskId, op: Fut) -> T
where
    Fut: Future<Output = T>,
{
    let outcome = op.await;
    sessions.dispose(task).await;
    outcome
}
