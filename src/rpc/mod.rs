//! RPC interceptor framework: context, wire reply, interception,
//! registration, and the thin server bootstrap.

pub mod context;
pub mod interceptor;
pub mod registry;
pub mod reply;
pub mod server;

pub use context::{CallContext, TaskId};
pub use interceptor::{
    CallRecord, CleanupHook, Interceptor, InterceptorSettings, StreamCall, noop_cleanup,
};
pub use registry::{Route, ServiceRegistry};
pub use reply::Reply;

use crate::error::ServiceError;

/// Runs an operation that cannot cooperate with the scheduler on the
/// bounded auxiliary worker pool.
///
/// The pool is tokio's blocking pool, sized at startup via
/// `RPC_WORKER_THREADS`.
///
/// # Errors
///
/// Returns a generic [`ServiceError`] when the worker task is cancelled
/// or panics; the failure detail is logged, not surfaced.
pub async fn run_blocking<F, T>(f: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|err| {
        tracing::error!(error = %err, "auxiliary worker task failed");
        ServiceError::server()
    })
}
