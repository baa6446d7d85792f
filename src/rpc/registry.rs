//! Explicit handler registration table.
//!
//! Each handler is registered under its method name with a declared kind
//! (unary or streaming) and wrapped by the [`Interceptor`] at registration
//! time. Wire payloads are `serde_json::Value`; typed handlers are adapted
//! with serde, so a malformed payload surfaces as a validation envelope
//! through the normal translation path.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::context::CallContext;
use super::interceptor::{Interceptor, WrappedStream, WrappedUnary};
use crate::error::ServiceError;

/// A registered, already-wrapped handler.
pub enum Route {
    /// One request, one reply.
    Unary(WrappedUnary<serde_json::Value, serde_json::Value>),
    /// One request, a lazy finite sequence of replies.
    Streaming(WrappedStream<serde_json::Value, serde_json::Value>),
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(_) => write!(f, "Route::Unary"),
            Self::Streaming(_) => write!(f, "Route::Streaming"),
        }
    }
}

/// Method name → wrapped handler.
#[derive(Debug)]
pub struct ServiceRegistry {
    interceptor: Interceptor,
    routes: HashMap<&'static str, Route>,
}

impl ServiceRegistry {
    /// Creates an empty registry wrapping handlers with `interceptor`.
    #[must_use]
    pub fn new(interceptor: Interceptor) -> Self {
        Self {
            interceptor,
            routes: HashMap::new(),
        }
    }

    /// Registers a unary handler under `method`, wrapping it immediately.
    pub fn register_unary<Req, Resp, H, Fut>(&mut self, method: &'static str, handler: H)
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        H: Fn(Req, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, anyhow::Error>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let adapted = move |value: serde_json::Value, ctx: CallContext| {
            let handler = Arc::clone(&handler);
            async move {
                let request: Req = serde_json::from_value(value).map_err(|e| {
                    anyhow::Error::new(ServiceError::validation(format!(
                        "malformed request payload: {e}"
                    )))
                })?;
                let response = handler(request, ctx).await?;
                serde_json::to_value(response).map_err(anyhow::Error::new)
            }
        };
        let wrapped = self.interceptor.wrap_unary(method, adapted);
        self.routes.insert(method, Route::Unary(wrapped));
    }

    /// Registers a streaming handler under `method`, wrapping it
    /// immediately.
    pub fn register_streaming<Req, Resp, H, S>(&mut self, method: &'static str, handler: H)
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        H: Fn(Req, CallContext) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Resp, anyhow::Error>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let adapted = move |value: serde_json::Value,
                            ctx: CallContext|
              -> BoxStream<'static, Result<serde_json::Value, anyhow::Error>> {
            match serde_json::from_value::<Req>(value) {
                Ok(request) => handler(request, ctx)
                    .map(|item| {
                        item.and_then(|resp| {
                            serde_json::to_value(resp).map_err(anyhow::Error::new)
                        })
                    })
                    .boxed(),
                Err(e) => futures_util::stream::once(async move {
                    Err(anyhow::Error::new(ServiceError::validation(format!(
                        "malformed request payload: {e}"
                    ))))
                })
                .boxed(),
            }
        };
        let wrapped = self.interceptor.wrap_stream(method, adapted);
        self.routes.insert(method, Route::Streaming(wrapped));
    }

    /// Looks up the wrapped handler for `method`.
    #[must_use]
    pub fn route(&self, method: &str) -> Option<&Route> {
        self.routes.get(method)
    }

    /// Registered method names, for startup logging.
    #[must_use]
    pub fn methods(&self) -> Vec<&'static str> {
        let mut methods: Vec<&'static str> = self.routes.keys().copied().collect();
        methods.sort_unstable();
        methods
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::rpc::interceptor::{InterceptorSettings, noop_cleanup};

    #[derive(Debug, serde::Deserialize)]
    struct PingRequest {}

    #[derive(Debug, serde::Serialize)]
    struct PingResponse {
        pong: bool,
    }

    fn make_registry() -> ServiceRegistry {
        ServiceRegistry::new(Interceptor::new(
            InterceptorSettings::default(),
            noop_cleanup(),
        ))
    }

    #[tokio::test]
    async fn dispatches_registered_unary_method() {
        let mut registry = make_registry();
        registry.register_unary("ping", |_req: PingRequest, _ctx| async move {
            Ok(PingResponse { pong: true })
        });

        let Some(Route::Unary(call)) = registry.route("ping") else {
            panic!("ping should be a unary route");
        };
        let reply = call(serde_json::json!({})).await;
        assert_eq!(reply.data, Some(serde_json::json!({"pong": true})));
    }

    #[tokio::test]
    async fn malformed_payload_becomes_validation_envelope() {
        let mut registry = make_registry();

        #[derive(Debug, serde::Deserialize)]
        struct AskRequest {
            content: String,
        }

        registry.register_unary("ask", |req: AskRequest, _ctx| async move {
            Ok(serde_json::json!({"echo": req.content}))
        });

        let Some(Route::Unary(call)) = registry.route("ask") else {
            panic!("ask should be a unary route");
        };
        let reply = call(serde_json::json!({"wrong": 42})).await;
        let Some(envelope) = reply.error else {
            panic!("expected a validation envelope");
        };
        assert_eq!(envelope.code, 40000);
    }

    #[tokio::test]
    async fn dispatches_registered_streaming_method() {
        let mut registry = make_registry();
        registry.register_streaming("countdown", |_req: PingRequest, _ctx| {
            futures_util::stream::iter(vec![Ok(3_u32), Ok(2), Ok(1)])
        });

        let Some(Route::Streaming(call)) = registry.route("countdown") else {
            panic!("countdown should be a streaming route");
        };
        let replies: Vec<_> = call(serde_json::json!({})).collect().await;
        assert_eq!(replies.len(), 3);
        assert_eq!(
            replies.first().and_then(|r| r.data.clone()),
            Some(serde_json::json!(3))
        );
    }

    #[test]
    fn unknown_method_has_no_route() {
        let registry = make_registry();
        assert!(registry.route("nope").is_none());
        assert!(registry.methods().is_empty());
    }

    #[test]
    fn methods_are_sorted() {
        let mut registry = make_registry();
        registry.register_unary("zeta", |_req: PingRequest, _ctx| async move {
            Ok(PingResponse { pong: true })
        });
        registry.register_unary("alpha", |_req: PingRequest, _ctx| async move {
            Ok(PingResponse { pong: true })
        });
        assert_eq!(registry.methods(), vec!["alpha", "zeta"]);
    }
}
