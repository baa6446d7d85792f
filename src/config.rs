//! Service configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`), with sensible defaults for local
//! development.

use std::net::SocketAddr;
use std::time::Duration;

use crate::db::EngineOptions;
use crate::rpc::InterceptorSettings;

/// Top-level service configuration.
///
/// Loaded once at startup via [`AppConfig::from_env`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Socket address to bind the RPC server to (e.g. `0.0.0.0:5000`).
    pub listen_addr: SocketAddr,

    /// Primary database DSNs (comma-separated in `DB_PRIMARY_URLS`).
    pub primary_urls: Vec<String>,

    /// Replica database DSNs (comma-separated in `DB_REPLICA_URLS`).
    /// When empty, reads are served by the primaries.
    pub replica_urls: Vec<String>,

    /// Base connection pool size per engine.
    pub pool_size: usize,

    /// Extra connections allowed above the base pool size.
    pub max_overflow: usize,

    /// Seconds of idleness after which a pooled connection is recycled.
    pub pool_recycle_secs: u64,

    /// Probe connection liveness before every pooled checkout.
    pub pool_pre_ping: bool,

    /// Per-call deadline in seconds for unary calls.
    pub rpc_deadline_secs: u64,

    /// Completed calls slower than this many seconds are tagged TOO_SLOW.
    pub slow_threshold_secs: u64,

    /// Maximum concurrent in-flight calls; excess callers wait.
    pub max_in_flight: usize,

    /// Size of the auxiliary worker pool for non-cooperative operations.
    pub worker_threads: usize,

    /// Maximum characters of the per-call request summary.
    pub summary_limit: usize,

    /// Sampling rate for the pool-status telemetry line (0.0 - 1.0).
    pub pool_log_rate: f64,
}

impl AppConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to local-development defaults when a variable is not
    /// set. Calls `dotenvy::dotenv().ok()` to optionally load a `.env`
    /// file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:5000".to_string())
            .parse()?;

        let primary_urls = split_dsns(
            &std::env::var("DB_PRIMARY_URLS")
                .unwrap_or_else(|_| "postgres://postgres:@localhost:5432/postgres".to_string()),
        );
        let replica_urls = split_dsns(&std::env::var("DB_REPLICA_URLS").unwrap_or_default());

        Ok(Self {
            listen_addr,
            primary_urls,
            replica_urls,
            pool_size: parse_env("DB_POOL_SIZE", 10),
            max_overflow: parse_env("DB_MAX_OVERFLOW", 10),
            pool_recycle_secs: parse_env("DB_POOL_RECYCLE_SECS", 30),
            pool_pre_ping: parse_env_bool("DB_POOL_PRE_PING", true),
            rpc_deadline_secs: parse_env("RPC_DEADLINE_SECS", 20),
            slow_threshold_secs: parse_env("RPC_SLOW_THRESHOLD_SECS", 3),
            max_in_flight: parse_env("RPC_MAX_IN_FLIGHT", 256),
            worker_threads: parse_env("RPC_WORKER_THREADS", 32),
            summary_limit: parse_env("RPC_SUMMARY_LIMIT", 128),
            pool_log_rate: parse_env("POOL_LOG_RATE", 0.05),
        })
    }

    /// Per-engine pool options derived from this configuration.
    #[must_use]
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            pool_size: self.pool_size,
            max_overflow: self.max_overflow,
            recycle: Duration::from_secs(self.pool_recycle_secs),
            pre_ping: self.pool_pre_ping,
        }
    }

    /// Interception parameters derived from this configuration.
    #[must_use]
    pub fn interceptor_settings(&self) -> InterceptorSettings {
        InterceptorSettings {
            deadline: Duration::from_secs(self.rpc_deadline_secs),
            slow_threshold: Duration::from_secs(self.slow_threshold_secs),
            summary_limit: self.summary_limit,
        }
    }
}

/// Splits a comma-separated DSN list, dropping empty entries.
fn split_dsns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}
