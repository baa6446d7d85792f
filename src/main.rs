//! switchyard server entry point.
//!
//! Builds the engine pools and scoped sessions, registers the service
//! handlers, and starts the RPC listener.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use switchyard::config::AppConfig;
use switchyard::db::{Connector, Engines, PgConnector, RandomStrategy, ScopedSessions};
use switchyard::rpc::{Interceptor, ServiceRegistry, server};

/// Request for the `ping` method.
#[derive(Debug, Deserialize)]
struct PingRequest {}

/// Reply for the `ping` method.
#[derive(Debug, Serialize)]
struct PingResponse {
    pong: bool,
}

fn main() -> anyhow::Result<()> {
    // Config is read before the runtime exists: the worker pool size is a
    // runtime construction parameter.
    let config = AppConfig::from_env()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.worker_threads)
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    tracing::info!(addr = %config.listen_addr, "starting switchyard");

    // Build the database layer
    let connector = Arc::new(PgConnector) as Arc<dyn Connector>;
    let engines = Arc::new(Engines::build(
        connector,
        &config.primary_urls,
        &config.replica_urls,
        &config.engine_options(),
        Box::new(RandomStrategy),
    )?);
    let sessions = Arc::new(ScopedSessions::new(Arc::clone(&engines)));

    // Wrap handlers with the interceptor; the cleanup hook disposes each
    // call's unit-of-work and samples pool telemetry.
    let hook = sessions.cleanup_hook(config.pool_log_rate);
    let interceptor = Interceptor::new(config.interceptor_settings(), hook);

    let mut registry = ServiceRegistry::new(interceptor);
    registry.register_unary("ping", |_req: PingRequest, _ctx| async move {
        Ok(PingResponse { pong: true })
    });

    server::serve(
        Arc::new(registry),
        config.listen_addr,
        config.max_in_flight,
    )
    .await
}
