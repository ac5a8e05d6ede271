//! Statement classifier for read/write routing
//!
//! Parses a SQL string (possibly a multi-statement batch) into an AST and
//! decides whether any statement in it can write rows or mutate schema. The
//! whole batch is routed by its most privileged statement: a single write
//! hidden among reads forces the write pool, because the two pools are not
//! guaranteed to see each other's uncommitted writes.
//!
//! Classification works on the parsed tree, not on keyword text, so comments,
//! string literals, and CTEs do not confuse routing. A string that fails to
//! parse is an error and never routes anywhere.

use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{Error, Result};

/// Capability a SQL batch requires from its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Batch only reads data
    Read,
    /// Batch can write rows or modify schema
    Write,
}

impl AccessMode {
    /// Whether this mode requires the write-capable pool
    #[inline]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }
}

/// Classify a SQL string as [`AccessMode::Read`] or [`AccessMode::Write`].
///
/// # Examples
///
/// ```
/// use pgsplit::classify::{classify, AccessMode};
///
/// assert_eq!(classify("SELECT 1").unwrap(), AccessMode::Read);
/// assert_eq!(
///     classify("SELECT 1; INSERT INTO t VALUES (1)").unwrap(),
///     AccessMode::Write
/// );
/// assert!(classify("definitely not sql").is_err());
/// ```
pub fn classify(sql: &str) -> Result<AccessMode> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(Error::parse)?;

    if statements.iter().any(statement_writes) {
        Ok(AccessMode::Write)
    } else {
        Ok(AccessMode::Read)
    }
}

/// Whether a single parsed statement can write data or modify schema.
///
/// Only statement kinds that are provably read-only return false; everything
/// unrecognized is treated as a write so new statement kinds can never leak
/// onto the read-only pool.
fn statement_writes(stmt: &Statement) -> bool {
    match stmt {
        Statement::Query(query) => query_writes(query),
        // Plain EXPLAIN only plans; EXPLAIN ANALYZE executes the statement.
        Statement::Explain {
            statement, analyze, ..
        } => *analyze && statement_writes(statement),
        _ => true,
    }
}

fn query_writes(query: &Query) -> bool {
    // SELECT ... FOR UPDATE / FOR SHARE takes row locks
    if !query.locks.is_empty() {
        return true;
    }

    if let Some(with) = &query.with {
        if with.cte_tables.iter().any(|cte| query_writes(&cte.query)) {
            return true;
        }
    }

    body_writes(&query.body)
}

fn body_writes(body: &SetExpr) -> bool {
    match body {
        // SELECT ... INTO creates a table
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::Values(_) => false,
        SetExpr::Query(inner) => query_writes(inner),
        SetExpr::SetOperation { left, right, .. } => body_writes(left) || body_writes(right),
        // Data-modifying query bodies (INSERT ... RETURNING etc.) and any
        // future variants route conservatively.
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_is_read() {
        assert_eq!(classify("SELECT * FROM users").unwrap(), AccessMode::Read);
        assert_eq!(classify("select 1; select 2;").unwrap(), AccessMode::Read);
    }

    #[test]
    fn test_writes_are_write() {
        for sql in [
            "INSERT INTO t (id) VALUES (1)",
            "UPDATE t SET id = 2 WHERE id = 1",
            "DELETE FROM t WHERE id = 1",
            "CREATE TABLE t (id INT)",
            "ALTER TABLE t ADD COLUMN name TEXT",
            "DROP TABLE t",
            "TRUNCATE t",
        ] {
            assert_eq!(classify(sql).unwrap(), AccessMode::Write, "{sql}");
        }
    }

    #[test]
    fn test_mixed_batch_is_write() {
        assert_eq!(
            classify("SELECT 1; INSERT INTO t (id) VALUES (1);").unwrap(),
            AccessMode::Write
        );
    }

    #[test]
    fn test_keywords_in_literals_and_comments_stay_read() {
        assert_eq!(
            classify("SELECT 'DROP TABLE users' AS threat").unwrap(),
            AccessMode::Read
        );
        assert_eq!(
            classify("-- insert into t values (1)\nSELECT 1").unwrap(),
            AccessMode::Read
        );
    }

    #[test]
    fn test_select_into_is_write() {
        assert_eq!(
            classify("SELECT * INTO archive FROM t").unwrap(),
            AccessMode::Write
        );
    }

    #[test]
    fn test_locking_select_is_write() {
        assert_eq!(
            classify("SELECT * FROM t WHERE id = 1 FOR UPDATE").unwrap(),
            AccessMode::Write
        );
    }

    #[test]
    fn test_cte_read_is_read() {
        assert_eq!(
            classify("WITH x AS (SELECT 1 AS n) SELECT n FROM x").unwrap(),
            AccessMode::Read
        );
    }

    #[test]
    fn test_explain_plans_read_executes_write() {
        assert_eq!(classify("EXPLAIN SELECT 1").unwrap(), AccessMode::Read);
        assert_eq!(
            classify("EXPLAIN ANALYZE DELETE FROM t").unwrap(),
            AccessMode::Write
        );
    }

    #[test]
    fn test_unparsable_is_error() {
        let err = classify("this is not sql").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(classify("SELECT * FROM").is_err());
    }
}
