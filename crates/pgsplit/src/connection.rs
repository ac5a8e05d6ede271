//! Connection traits for pgsplit
//!
//! The seams between the pool and the physical driver:
//! - [`Connection`]: one live database session
//! - [`Transaction`]: an open transaction on a session
//! - [`ConnectionFactory`]: opens sessions from a [`ConnectSpec`]
//!
//! The factory is a trait so tests can drive the pool and connector with
//! scripted in-memory sessions.

use async_trait::async_trait;
use secrecy::SecretString;

use crate::credentials::CredentialRecord;
use crate::error::Result;
use crate::types::{Row, Value};

/// A live connection to a database
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query and return at most one row
    async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let rows = self.query(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// Execute a statement, returning the affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Begin a transaction on this connection
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Check if the connection can still reach its database
    async fn is_valid(&self) -> bool;

    /// Whether the session must be discarded instead of returned to a pool.
    ///
    /// Checked on checkin. A session stuck in a bad state (for example an
    /// unresolved transaction) reports true here and is closed rather than
    /// handed to the next borrower.
    fn needs_discard(&self) -> bool {
        false
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// An open database transaction
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Execute a query that returns rows, inside the transaction
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement inside the transaction
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Roll the transaction back
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Parameters for one physical connection attempt.
///
/// Built fresh for every connect from the credential record plus a token
/// that is valid right now; a spec never carries a placeholder password.
#[derive(Clone)]
pub struct ConnectSpec {
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database name
    pub dbname: String,
    /// Application name reported to the server
    pub application_name: String,
    password: SecretString,
}

impl ConnectSpec {
    /// Build a spec from a credential record and a freshly resolved token
    pub fn new(record: &CredentialRecord, token: SecretString) -> Self {
        Self {
            host: record.host.clone(),
            port: record.port,
            user: record.username.clone(),
            dbname: record.dbname.clone(),
            application_name: "pgsplit".to_string(),
            password: token,
        }
    }

    /// The connection password (an auth token)
    pub fn password(&self) -> &SecretString {
        &self.password
    }
}

impl std::fmt::Debug for ConnectSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never leak the token into logs.
        f.debug_struct("ConnectSpec")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("dbname", &self.dbname)
            .field("application_name", &self.application_name)
            .field("password", &"***")
            .finish()
    }
}

/// Factory for opening physical connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a connection described by `spec`
    async fn connect(&self, spec: &ConnectSpec) -> Result<Box<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CredentialRecord {
        CredentialRecord {
            username: "app".into(),
            engine: "postgres".into(),
            host: "db.internal".into(),
            port: 5432,
            dbname: "core".into(),
        }
    }

    #[test]
    fn test_spec_from_record() {
        let spec = ConnectSpec::new(&record(), SecretString::from("tok".to_string()));
        assert_eq!(spec.host, "db.internal");
        assert_eq!(spec.port, 5432);
        assert_eq!(spec.user, "app");
        assert_eq!(spec.dbname, "core");
    }

    #[test]
    fn test_debug_redacts_password() {
        let spec = ConnectSpec::new(&record(), SecretString::from("super-secret".to_string()));
        let rendered = format!("{spec:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("***"));
    }
}
