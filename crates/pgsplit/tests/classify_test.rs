//! Tests for statement classification

use pgsplit::prelude::*;

// ==================== Read Shapes ====================

#[test]
fn test_read_shapes() {
    for sql in [
        "SELECT 1",
        "SELECT id, name FROM users WHERE id = $1",
        "SELECT a FROM t UNION SELECT b FROM u",
        "(SELECT 1) INTERSECT (SELECT 2)",
        "WITH recent AS (SELECT * FROM orders WHERE ts > now()) SELECT count(*) FROM recent",
        "EXPLAIN SELECT * FROM users",
        "SELECT * FROM users; SELECT * FROM orders",
    ] {
        assert_eq!(classify(sql).unwrap(), AccessMode::Read, "{sql}");
    }
}

// ==================== Write Shapes ====================

#[test]
fn test_write_shapes() {
    for sql in [
        "INSERT INTO t (id) VALUES (1)",
        "INSERT INTO t SELECT * FROM staging",
        "UPDATE t SET x = 1",
        "DELETE FROM t",
        "TRUNCATE t",
        "CREATE INDEX idx ON t (x)",
        "DROP VIEW v",
        "GRANT SELECT ON t TO role_a",
        "SELECT * FROM t FOR UPDATE",
        "SELECT * FROM t FOR SHARE",
        "SELECT * INTO archive FROM t",
        "EXPLAIN ANALYZE UPDATE t SET x = 1",
    ] {
        assert_eq!(classify(sql).unwrap(), AccessMode::Write, "{sql}");
    }
}

// ==================== Batch Routing ====================

#[test]
fn test_batch_routes_by_most_privileged_statement() {
    assert_eq!(
        classify("SELECT 1; UPDATE t SET x = 1; SELECT 2").unwrap(),
        AccessMode::Write
    );
    assert_eq!(
        classify("BEGIN; SELECT 1; COMMIT").unwrap(),
        AccessMode::Write
    );
}

#[test]
fn test_write_keywords_in_text_do_not_misroute() {
    assert_eq!(
        classify("SELECT 'UPDATE t SET x = 1' AS sample FROM audit_log").unwrap(),
        AccessMode::Read
    );
    assert_eq!(
        classify("/* DELETE FROM t */ SELECT 1").unwrap(),
        AccessMode::Read
    );
}

#[test]
fn test_parse_failure_is_an_error() {
    for sql in ["SELEC 1", "SELECT * FROM WHERE", "not sql at all"] {
        assert!(classify(sql).is_err(), "{sql:?}");
    }
}
