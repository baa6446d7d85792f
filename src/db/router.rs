//! Primary/replica engine sets and statement routing.
//!
//! [`Engines`] owns every [`Engine`] built at startup and resolves which
//! one a statement is routed to. Selection among the engines of a role is
//! delegated to a [`SelectionStrategy`] so random spreading can later be
//! swapped for a health- or latency-aware strategy without touching the
//! resolver's call sites.

use std::fmt;
use std::sync::Arc;

use rand::Rng;

use super::connector::{Connector, DbError};
use super::engine::{Engine, EngineOptions, EngineRole, PoolStatus};
use super::session::BindContext;
use super::statement::Statement;

/// Picks one engine out of a role's set.
pub trait SelectionStrategy: Send + Sync + fmt::Debug {
    /// Returns an index into `engines`, or `None` when the set is empty.
    fn select<'a>(&self, engines: &'a [Arc<Engine>]) -> Option<&'a Arc<Engine>>;
}

/// Uniform random selection; simple spreading, no health awareness.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomStrategy;

impl SelectionStrategy for RandomStrategy {
    fn select<'a>(&self, engines: &'a [Arc<Engine>]) -> Option<&'a Arc<Engine>> {
        if engines.is_empty() {
            return None;
        }
        engines.get(rand::thread_rng().gen_range(0..engines.len()))
    }
}

/// The process-wide engine sets and routing policy.
///
/// When no replica DSN is configured the replica set aliases the primary
/// engines, so every statement effectively goes to a primary.
#[derive(Debug)]
pub struct Engines {
    primaries: Vec<Arc<Engine>>,
    replicas: Vec<Arc<Engine>>,
    strategy: Box<dyn SelectionStrategy>,
}

impl Engines {
    /// Builds one engine per DSN, tagging primaries and replicas.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Configuration`] when `primary_dsns` is empty.
    pub fn build(
        connector: Arc<dyn Connector>,
        primary_dsns: &[String],
        replica_dsns: &[String],
        options: &EngineOptions,
        strategy: Box<dyn SelectionStrategy>,
    ) -> Result<Self, DbError> {
        if primary_dsns.is_empty() {
            return Err(DbError::Configuration(
                "at least one primary DSN is required".to_string(),
            ));
        }

        let primaries: Vec<Arc<Engine>> = primary_dsns
            .iter()
            .enumerate()
            .map(|(i, dsn)| {
                Arc::new(Engine::new(
                    format!("primary-{i}"),
                    EngineRole::Primary,
                    dsn,
                    options.clone(),
                    Arc::clone(&connector),
                ))
            })
            .collect();

        let replicas: Vec<Arc<Engine>> = if replica_dsns.is_empty() {
            primaries.iter().map(Arc::clone).collect()
        } else {
            replica_dsns
                .iter()
                .enumerate()
                .map(|(i, dsn)| {
                    Arc::new(Engine::new(
                        format!("replica-{i}"),
                        EngineRole::Replica,
                        dsn,
                        options.clone(),
                        Arc::clone(&connector),
                    ))
                })
                .collect()
        };

        Ok(Self {
            primaries,
            replicas,
            strategy,
        })
    }

    /// Resolves the engine a statement is routed to, in priority order:
    ///
    /// 1. the unit-of-work is flushing pending writes → primary;
    /// 2. the statement mutates rows in place → primary;
    /// 3. the bind context forces primary for this task → primary;
    /// 4. otherwise → a uniformly random replica.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Configuration`] when the selected role's set is
    /// empty; [`Engines::build`] guarantees this cannot happen for sets it
    /// produced.
    pub fn resolve(
        &self,
        flushing: bool,
        statement: &Statement,
        bind: &BindContext,
    ) -> Result<Arc<Engine>, DbError> {
        if flushing || statement.is_mutating() || bind.is_primary_forced() {
            self.pick_primary()
        } else {
            self.pick_replica()
        }
    }

    /// Selects a primary engine.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Configuration`] when the primary set is empty.
    pub fn pick_primary(&self) -> Result<Arc<Engine>, DbError> {
        self.strategy
            .select(&self.primaries)
            .map(Arc::clone)
            .ok_or_else(|| DbError::Configuration("no primary engine configured".to_string()))
    }

    /// Selects a replica engine.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Configuration`] when the replica set is empty.
    pub fn pick_replica(&self) -> Result<Arc<Engine>, DbError> {
        self.strategy
            .select(&self.replicas)
            .map(Arc::clone)
            .ok_or_else(|| DbError::Configuration("no replica engine configured".to_string()))
    }

    /// Returns the primary engines.
    #[must_use]
    pub fn primaries(&self) -> &[Arc<Engine>] {
        &self.primaries
    }

    /// Returns the replica engines (the primaries when no replica DSN was
    /// configured).
    #[must_use]
    pub fn replicas(&self) -> &[Arc<Engine>] {
        &self.replicas
    }

    /// Snapshots every pool. Aliased replica engines are not repeated.
    #[must_use]
    pub fn status(&self) -> Vec<PoolStatus> {
        let mut statuses: Vec<PoolStatus> =
            self.primaries.iter().map(|engine| engine.status()).collect();
        for replica in &self.replicas {
            if !self.primaries.iter().any(|p| Arc::ptr_eq(p, replica)) {
                statuses.push(replica.status());
            }
        }
        statuses
    }

    /// One-line pool summary for sampled telemetry.
    #[must_use]
    pub fn status_summary(&self) -> String {
        self.status()
            .iter()
            .map(PoolStatus::to_string)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::testing::MemoryConnector;

    fn build_engines(primaries: &[&str], replicas: &[&str]) -> Engines {
        let connector = MemoryConnector::shared();
        let primary_dsns: Vec<String> = primaries.iter().map(|s| (*s).to_string()).collect();
        let replica_dsns: Vec<String> = replicas.iter().map(|s| (*s).to_string()).collect();
        Engines::build(
            connector as Arc<dyn Connector>,
            &primary_dsns,
            &replica_dsns,
            &EngineOptions::default(),
            Box::new(RandomStrategy),
        )
        .unwrap()
    }

    #[test]
    fn build_requires_a_primary() {
        let connector = MemoryConnector::shared();
        let result = Engines::build(
            connector as Arc<dyn Connector>,
            &[],
            &[],
            &EngineOptions::default(),
            Box::new(RandomStrategy),
        );
        assert!(matches!(result, Err(DbError::Configuration(_))));
    }

    #[test]
    fn missing_replicas_alias_the_primaries() {
        let engines = build_engines(&["mem://p0"], &[]);
        let Some(primary) = engines.primaries().first() else {
            panic!("expected a primary");
        };
        let Some(replica) = engines.replicas().first() else {
            panic!("expected an aliased replica");
        };
        assert!(Arc::ptr_eq(primary, replica));
        // Aliased engines must not be double-counted in the status list.
        assert_eq!(engines.status().len(), 1);
    }

    #[test]
    fn mutating_statements_always_resolve_to_primary() {
        let engines = build_engines(&["mem://p0"], &["mem://r0", "mem://r1"]);
        let bind = BindContext::new();
        let stmt = Statement::new("UPDATE account SET name = 'x'");
        for _ in 0..64 {
            let engine = engines.resolve(false, &stmt, &bind).unwrap();
            assert_eq!(engine.role(), EngineRole::Primary);
        }
    }

    #[test]
    fn flushing_resolves_to_primary() {
        let engines = build_engines(&["mem://p0"], &["mem://r0"]);
        let bind = BindContext::new();
        let stmt = Statement::new("INSERT INTO account VALUES (1)");
        let engine = engines.resolve(true, &stmt, &bind).unwrap();
        assert_eq!(engine.role(), EngineRole::Primary);
    }

    #[test]
    fn forced_bind_resolves_to_primary() {
        let engines = build_engines(&["mem://p0"], &["mem://r0"]);
        let bind = BindContext::new();
        bind.set_forced(true);
        let stmt = Statement::new("SELECT * FROM account");
        let engine = engines.resolve(false, &stmt, &bind).unwrap();
        assert_eq!(engine.role(), EngineRole::Primary);
    }

    #[test]
    fn reads_spread_across_replicas() {
        let engines = build_engines(&["mem://p0"], &["mem://r0", "mem://r1"]);
        let bind = BindContext::new();
        let stmt = Statement::new("SELECT 1");
        let mut seen = std::collections::HashSet::new();
        for _ in 0..256 {
            let engine = engines.resolve(false, &stmt, &bind).unwrap();
            assert_eq!(engine.role(), EngineRole::Replica);
            seen.insert(engine.name().to_string());
        }
        assert_eq!(seen.len(), 2, "both replicas should be selected");
    }
}
