//! Cross-cutting interception of handler methods.
//!
//! [`Interceptor`] wraps a handler into one with the same external shape
//! that enforces the call deadline, logs with a bounded request summary,
//! classifies slow calls, translates errors into the wire envelope, and
//! runs the post-call cleanup hook exactly once per call. Unary and
//! streaming handlers are wrapped uniformly.
//!
//! Every timer and summary is call-local; wrapped handlers share no
//! mutable state and are safe under arbitrary concurrent invocation.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, Stream, StreamExt};

use super::context::{CallContext, TaskId};
use super::reply::Reply;
use crate::error::{ServiceError, translate};

/// Post-call hook, invoked exactly once per intercepted call.
///
/// Receives the call's task identity; the canonical hook disposes the
/// task's unit-of-work and samples pool telemetry
/// (see [`crate::db::ScopedSessions::cleanup_hook`]).
pub type CleanupHook = Arc<dyn Fn(TaskId) -> BoxFuture<'static, ()> + Send + Sync>;

/// A hook that does nothing; for services without a database layer.
#[must_use]
pub fn noop_cleanup() -> CleanupHook {
    Arc::new(|_task| Box::pin(async {}))
}

/// Interception parameters.
#[derive(Debug, Clone)]
pub struct InterceptorSettings {
    /// Deadline enforced on every unary call.
    pub deadline: Duration,
    /// Completed calls slower than this are logged with a `TOO_SLOW` tag.
    pub slow_threshold: Duration,
    /// Maximum characters of the request summary; longer payloads are
    /// truncated and annotated.
    pub summary_limit: usize,
}

impl Default for InterceptorSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(20),
            slow_threshold: Duration::from_secs(3),
            summary_limit: 128,
        }
    }
}

/// Per-invocation metadata: bounded request summary and start instant.
///
/// Exists only for the duration of one call; never persisted or shared.
#[derive(Debug, Clone)]
pub struct CallRecord {
    summary: String,
    started: Instant,
}

impl CallRecord {
    /// Starts the record for one invocation, summarizing the request.
    #[must_use]
    pub fn begin<R: fmt::Debug>(method: &str, request: &R, limit: usize) -> Self {
        let raw = format!("{request:?}");
        let summary = if raw.chars().count() > limit {
            let truncated: String = raw.chars().take(limit).collect();
            format!("{method}({truncated}...)")
        } else {
            format!("{method}({raw})")
        };
        Self {
            summary,
            started: Instant::now(),
        }
    }

    /// Returns the bounded `method(request)` summary.
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Time elapsed since the call started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A wrapped unary handler: identical signature, never errors on the wire.
pub type WrappedUnary<Req, Resp> =
    Arc<dyn Fn(Req) -> BoxFuture<'static, Reply<Resp>> + Send + Sync>;

/// A wrapped streaming handler.
pub type WrappedStream<Req, Resp> =
    Arc<dyn Fn(Req) -> BoxStream<'static, Reply<Resp>> + Send + Sync>;

/// Wraps handlers with deadline, logging, error translation, and the
/// cleanup hook.
#[derive(Clone)]
pub struct Interceptor {
    settings: InterceptorSettings,
    hook: CleanupHook,
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Interceptor {
    /// Creates an interceptor with the given settings and cleanup hook.
    #[must_use]
    pub fn new(settings: InterceptorSettings, hook: CleanupHook) -> Self {
        Self { settings, hook }
    }

    /// Returns the interception parameters.
    #[must_use]
    pub const fn settings(&self) -> &InterceptorSettings {
        &self.settings
    }

    /// Wraps a unary handler.
    ///
    /// The wrapped call records a summary, creates a fresh [`CallContext`],
    /// runs the handler under the deadline, translates the outcome into a
    /// [`Reply`], awaits the cleanup hook, and logs the result with its
    /// slow-call classification. A deadline hit is substituted with the
    /// request-timeout envelope; the raw cancellation never escapes.
    pub fn wrap_unary<Req, Resp, H, Fut>(
        &self,
        method: &'static str,
        handler: H,
    ) -> WrappedUnary<Req, Resp>
    where
        Req: fmt::Debug + Send + 'static,
        Resp: Send + 'static,
        H: Fn(Req, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, anyhow::Error>> + Send + 'static,
    {
        let settings = self.settings.clone();
        let hook = Arc::clone(&self.hook);
        Arc::new(move |request: Req| {
            let record = CallRecord::begin(method, &request, settings.summary_limit);
            let ctx = CallContext::new();
            let fut = handler(request, ctx);
            let settings = settings.clone();
            let hook = Arc::clone(&hook);
            Box::pin(async move {
                let outcome = tokio::time::timeout(settings.deadline, fut).await;
                let reply = match outcome {
                    Ok(Ok(response)) => {
                        let elapsed = record.elapsed();
                        if elapsed > settings.slow_threshold {
                            tracing::warn!(call = %record.summary(), ?elapsed, "rpc ok | TOO_SLOW");
                        } else {
                            tracing::info!(call = %record.summary(), ?elapsed, "rpc ok");
                        }
                        Reply::ok(response)
                    }
                    Ok(Err(err)) => {
                        let elapsed = record.elapsed();
                        if let Some(domain) = err.downcast_ref::<ServiceError>() {
                            tracing::error!(
                                call = %record.summary(),
                                ?elapsed,
                                code = domain.code(),
                                error = %domain,
                                "rpc error"
                            );
                        } else {
                            tracing::error!(
                                call = %record.summary(),
                                ?elapsed,
                                error = ?err,
                                "rpc failed"
                            );
                        }
                        Reply::error(translate(&err))
                    }
                    Err(_deadline) => {
                        tracing::error!(
                            call = %record.summary(),
                            elapsed = ?record.elapsed(),
                            "rpc timeout"
                        );
                        Reply::error(ServiceError::timeout().envelope())
                    }
                };
                hook(ctx.task()).await;
                reply
            })
        })
    }

    /// Wraps a streaming handler.
    ///
    /// Items are forwarded to the caller as they are produced, never
    /// buffered. A mid-stream error appends one terminal error envelope
    /// and stops iteration. The cleanup hook runs before the stream
    /// terminates, and still runs when the consumer drops the stream
    /// early.
    pub fn wrap_stream<Req, Resp, H, S>(
        &self,
        method: &'static str,
        handler: H,
    ) -> WrappedStream<Req, Resp>
    where
        Req: fmt::Debug + Send + 'static,
        Resp: Send + 'static + Unpin,
        H: Fn(Req, CallContext) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Resp, anyhow::Error>> + Send + 'static,
    {
        let settings = self.settings.clone();
        let hook = Arc::clone(&self.hook);
        Arc::new(move |request: Req| {
            let record = CallRecord::begin(method, &request, settings.summary_limit);
            let ctx = CallContext::new();
            let inner = handler(request, ctx).boxed();
            StreamCall {
                record,
                settings: settings.clone(),
                task: ctx.task(),
                inner: Some(inner),
                hook: Some(Arc::clone(&hook)),
                cleanup: None,
                pending: None,
                items: 0,
            }
            .boxed()
        })
    }
}

/// The intercepted form of a streaming call.
///
/// Forwards items, translates a mid-stream failure into one terminal
/// error envelope, and guarantees the cleanup hook runs exactly once —
/// awaited inline on normal termination, spawned when the consumer drops
/// the stream early.
pub struct StreamCall<Resp> {
    record: CallRecord,
    settings: InterceptorSettings,
    task: TaskId,
    inner: Option<BoxStream<'static, Result<Resp, anyhow::Error>>>,
    hook: Option<CleanupHook>,
    cleanup: Option<BoxFuture<'static, ()>>,
    pending: Option<Reply<Resp>>,
    items: usize,
}

impl<Resp> fmt::Debug for StreamCall<Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCall")
            .field("call", &self.record.summary())
            .field("items", &self.items)
            .finish_non_exhaustive()
    }
}

impl<Resp> StreamCall<Resp> {
    fn start_cleanup(&mut self) {
        if let Some(hook) = self.hook.take() {
            self.cleanup = Some(hook(self.task));
        }
    }
}

impl<Resp: Send + 'static + Unpin> Stream for StreamCall<Resp> {
    type Item = Reply<Resp>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(cleanup) = this.cleanup.as_mut() {
                match cleanup.as_mut().poll(cx) {
                    Poll::Ready(()) => {
                        this.cleanup = None;
                        return match this.pending.take() {
                            Some(reply) => Poll::Ready(Some(reply)),
                            None => Poll::Ready(None),
                        };
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };
            match inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(item))) => {
                    this.items += 1;
                    return Poll::Ready(Some(Reply::ok(item)));
                }
                Poll::Ready(Some(Err(err))) => {
                    this.inner = None;
                    let elapsed = this.record.elapsed();
                    if let Some(domain) = err.downcast_ref::<ServiceError>() {
                        tracing::error!(
                            call = %this.record.summary(),
                            ?elapsed,
                            code = domain.code(),
                            error = %domain,
                            "rpc stream error"
                        );
                    } else {
                        tracing::error!(
                            call = %this.record.summary(),
                            ?elapsed,
                            error = ?err,
                            "rpc stream failed"
                        );
                    }
                    this.pending = Some(Reply::error(translate(&err)));
                    this.start_cleanup();
                }
                Poll::Ready(None) => {
                    this.inner = None;
                    let elapsed = this.record.elapsed();
                    if elapsed > this.settings.slow_threshold {
                        tracing::warn!(
                            call = %this.record.summary(),
                            ?elapsed,
                            items = this.items,
                            "rpc stream ok | TOO_SLOW"
                        );
                    } else {
                        tracing::info!(
                            call = %this.record.summary(),
                            ?elapsed,
                            items = this.items,
                            "rpc stream ok"
                        );
                    }
                    this.start_cleanup();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<Resp> Drop for StreamCall<Resp> {
    fn drop(&mut self) {
        let pending_cleanup = match (self.hook.take(), self.cleanup.take()) {
            (Some(hook), _) => Some(hook(self.task)),
            (None, Some(cleanup)) => Some(cleanup),
            (None, None) => None,
        };
        if let Some(cleanup) = pending_cleanup {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let _ = handle.spawn(cleanup);
                }
                Err(_) => {
                    tracing::warn!(task = %self.task, "no runtime to run the rpc cleanup hook");
                }
            }
        }
    }
}
