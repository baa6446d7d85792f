//! In-memory connector double for pool and routing tests.
//!
//! Records every operation keyed by DSN so tests can assert which engine a
//! statement landed on, and exposes failure toggles for the pool's
//! liveness handling.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::connector::{Connection, Connector, DbError};
use super::statement::Statement;

/// Operation log shared by every connection of one connector.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    ops: Mutex<Vec<(String, String)>>,
}

impl Recorder {
    fn record(&self, dsn: &str, op: String) {
        if let Ok(mut ops) = self.ops.lock() {
            ops.push((dsn.to_string(), op));
        }
    }

    /// Operations recorded against one DSN, in submission order.
    pub(crate) fn ops_for(&self, dsn: &str) -> Vec<String> {
        self.ops
            .lock()
            .map(|ops| {
                ops.iter()
                    .filter(|(d, _)| d == dsn)
                    .map(|(_, op)| op.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Connector double handing out recording connections.
#[derive(Debug, Default)]
pub(crate) struct MemoryConnector {
    recorder: Arc<Recorder>,
    next_id: AtomicUsize,
    connects: AtomicUsize,
    fail_ping: Arc<AtomicBool>,
}

impl MemoryConnector {
    pub(crate) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    pub(crate) fn fail_pings(&self, on: bool) {
        self.fail_ping.store(on, Ordering::Release);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, dsn: &str) -> Result<Box<dyn Connection>, DbError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.connects.fetch_add(1, Ordering::Relaxed);
        self.recorder.record(dsn, format!("connect#{id}"));
        Ok(Box::new(MemoryConnection {
            id,
            dsn: dsn.to_string(),
            recorder: Arc::clone(&self.recorder),
            fail_ping: Arc::clone(&self.fail_ping),
        }))
    }
}

#[derive(Debug)]
struct MemoryConnection {
    id: usize,
    dsn: String,
    recorder: Arc<Recorder>,
    fail_ping: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&mut self, statement: &Statement) -> Result<u64, DbError> {
        self.recorder
            .record(&self.dsn, format!("exec#{} {}", self.id, statement.sql()));
        Ok(1)
    }

    async fn ping(&mut self) -> Result<(), DbError> {
        if self.fail_ping.load(Ordering::Acquire) {
            return Err(DbError::Backend("ping failed".to_string()));
        }
        self.recorder.record(&self.dsn, format!("ping#{}", self.id));
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        self.recorder.record(&self.dsn, format!("begin#{}", self.id));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.recorder
            .record(&self.dsn, format!("commit#{}", self.id));
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.recorder
            .record(&self.dsn, format!("rollback#{}", self.id));
        Ok(())
    }
}
