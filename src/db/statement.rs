//! SQL statement with an explicit routing classification.
//!
//! The routing resolver needs to know whether a statement mutates data
//! without parsing SQL; [`StatementKind`] is derived from the leading verb
//! at construction time and can be forced with the kind-specific
//! constructors.

use std::fmt;

/// Classification of a statement for routing purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// A read (`SELECT`).
    Read,
    /// An `INSERT`; staged writes reach the primary through the flush path.
    Insert,
    /// An `UPDATE`; always routed to a primary engine.
    Update,
    /// A `DELETE`; always routed to a primary engine.
    Delete,
    /// Anything else (DDL, `SET`, ...); routed like a read.
    Other,
}

/// A single SQL statement issued through a unit-of-work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    kind: StatementKind,
}

impl Statement {
    /// Creates a statement, classifying it from its leading verb.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let kind = classify(&sql);
        Self { sql, kind }
    }

    /// Creates a statement with an explicit kind, bypassing classification.
    #[must_use]
    pub fn with_kind(sql: impl Into<String>, kind: StatementKind) -> Self {
        Self {
            sql: sql.into(),
            kind,
        }
    }

    /// Returns the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Returns the routing classification.
    #[must_use]
    pub const fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Returns `true` for statements that mutate existing rows in place.
    ///
    /// Inserts are not considered mutating here: they are staged on the
    /// unit-of-work and reach the primary through the flushing rule.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(self.kind, StatementKind::Update | StatementKind::Delete)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Classifies SQL by its first keyword.
fn classify(sql: &str) -> StatementKind {
    let verb = sql
        .split_whitespace()
        .next()
        .map(str::to_ascii_uppercase)
        .unwrap_or_default();
    match verb.as_str() {
        "SELECT" => StatementKind::Read,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        _ => StatementKind::Other,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_leading_verb() {
        assert_eq!(
            Statement::new("SELECT * FROM account").kind(),
            StatementKind::Read
        );
        assert_eq!(
            Statement::new("insert into account values (1)").kind(),
            StatementKind::Insert
        );
        assert_eq!(
            Statement::new("Update account SET name = 'x'").kind(),
            StatementKind::Update
        );
        assert_eq!(
            Statement::new("DELETE FROM account WHERE id = 1").kind(),
            StatementKind::Delete
        );
        assert_eq!(
            Statement::new("CREATE TABLE account (id BIGINT)").kind(),
            StatementKind::Other
        );
    }

    #[test]
    fn leading_whitespace_is_ignored() {
        assert_eq!(
            Statement::new("   select 1").kind(),
            StatementKind::Read
        );
    }

    #[test]
    fn empty_sql_is_other() {
        assert_eq!(Statement::new("").kind(), StatementKind::Other);
    }

    #[test]
    fn only_update_and_delete_are_mutating() {
        assert!(Statement::new("UPDATE t SET a = 1").is_mutating());
        assert!(Statement::new("DELETE FROM t").is_mutating());
        assert!(!Statement::new("INSERT INTO t VALUES (1)").is_mutating());
        assert!(!Statement::new("SELECT 1").is_mutating());
    }

    #[test]
    fn explicit_kind_overrides_classification() {
        let stmt = Statement::with_kind("WITH x AS (SELECT 1) UPDATE t SET a = 1", StatementKind::Update);
        assert_eq!(stmt.kind(), StatementKind::Update);
        assert!(stmt.is_mutating());
    }
}
