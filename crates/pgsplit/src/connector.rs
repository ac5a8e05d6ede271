//! Dual-pool connector facade
//!
//! A [`Connector`] owns up to two role-bound pools (reader and writer) and
//! routes every SQL batch to the pool its classification requires. Reads go
//! to the reader, anything that can write rows or mutate schema goes to the
//! writer, and a batch that cannot be parsed goes nowhere.
//!
//! Pools are installed by [`Connector::open`] and torn down by
//! [`Connector::close`]; an operation that needs an absent pool returns the
//! matching routing sentinel ([`Error::ReaderUnavailable`] or
//! [`Error::WriterUnavailable`]) instead of guessing.

use futures::future::BoxFuture;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::classify::{classify, AccessMode};
use crate::connection::{ConnectionFactory, Transaction};
use crate::credentials::CredentialProvider;
use crate::error::{Error, Result};
use crate::pool::{Pool, PoolConfig, PoolCredentials, PooledConnection};
use crate::types::{Row, Value};

/// Secret holding the reader role's connection parameters
pub const READ_SECRET_NAME: &str = "core_iam_user_read";

/// Secret holding the writer role's connection parameters
pub const WRITE_SECRET_NAME: &str = "core_iam_user_write";

/// Which pools a connector should establish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Reader pool only
    Read,
    /// Writer pool only
    Write,
    /// Both pools
    ReadAndWrite,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "readAndWrite" => Ok(Self::ReadAndWrite),
            other => Err(Error::invalid_role(other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
            Self::ReadAndWrite => f.write_str("readAndWrite"),
        }
    }
}

/// The result of a single-row query, with all failures deferred.
///
/// Routing, classification, and dispatch errors are stored here and surface
/// only when the row is read, so call sites can chain
/// `query_row(..).await.row()` without an intermediate check.
#[derive(Debug)]
pub struct DeferredRow {
    outcome: Result<Option<Row>>,
}

impl DeferredRow {
    /// Consume the deferred result, requiring exactly one row.
    ///
    /// Returns [`Error::NoRows`] if the query succeeded but selected nothing.
    pub fn row(self) -> Result<Row> {
        match self.outcome? {
            Some(row) => Ok(row),
            None => Err(Error::NoRows),
        }
    }

    /// Consume the deferred result, allowing an empty result set.
    pub fn optional(self) -> Result<Option<Row>> {
        self.outcome
    }
}

/// A transaction together with the pooled connection it runs on.
///
/// The connection stays checked out for the transaction's lifetime. Dropping
/// the handle without resolving it marks the session for discard, so the
/// pool never hands a session stuck mid-transaction to the next borrower.
pub struct OpenTransaction {
    // Declared before the connection so an unresolved transaction marks its
    // session dirty before the connection is returned to the pool.
    inner: Box<dyn Transaction>,
    _conn: PooledConnection,
}

impl OpenTransaction {
    /// Execute a query inside the transaction
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.inner.query(sql, params).await
    }

    /// Execute a statement inside the transaction
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.inner.execute(sql, params).await
    }

    /// Commit the transaction and return the connection to the pool
    pub async fn commit(self) -> Result<()> {
        self.inner.commit().await
    }

    /// Roll the transaction back and return the connection to the pool
    pub async fn rollback(self) -> Result<()> {
        self.inner.rollback().await
    }
}

/// Routes queries across a reader pool and a writer pool.
///
/// Methods that dispatch SQL take `&self`; [`open`](Self::open) and
/// [`close`](Self::close) take `&mut self` because they swap pools.
pub struct Connector {
    provider: CredentialProvider,
    factory: Arc<dyn ConnectionFactory>,
    pool_config: PoolConfig,
    reader: Option<Arc<Pool>>,
    writer: Option<Arc<Pool>>,
}

impl Connector {
    /// Create a connector with no pools established
    pub fn new(provider: CredentialProvider, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            provider,
            factory,
            pool_config: PoolConfig::default(),
            reader: None,
            writer: None,
        }
    }

    /// Override the pool configuration applied to pools opened afterwards
    pub fn with_pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Whether a reader pool is currently installed
    pub fn has_reader(&self) -> bool {
        self.reader.is_some()
    }

    /// Whether a writer pool is currently installed
    pub fn has_writer(&self) -> bool {
        self.writer.is_some()
    }

    /// Establish the pools for `role`.
    ///
    /// For [`Role::ReadAndWrite`] both pools are established concurrently and
    /// both attempts run to completion. If either fails, whichever pool did
    /// come up is closed, nothing is installed, and the first failure (reader
    /// first) is returned; retrying `open` afterwards is safe. A failed open
    /// never disturbs a pool installed by an earlier call.
    pub async fn open(&mut self, role: Role) -> Result<()> {
        match role {
            Role::Read => {
                let pool = self.establish(READ_SECRET_NAME).await?;
                self.install_reader(pool).await;
                Ok(())
            }
            Role::Write => {
                let pool = self.establish(WRITE_SECRET_NAME).await?;
                self.install_writer(pool).await;
                Ok(())
            }
            Role::ReadAndWrite => {
                let (read, write) = tokio::join!(
                    self.establish(READ_SECRET_NAME),
                    self.establish(WRITE_SECRET_NAME)
                );

                match (read, write) {
                    (Ok(reader), Ok(writer)) => {
                        self.install_reader(reader).await;
                        self.install_writer(writer).await;
                        Ok(())
                    }
                    (Err(e), Ok(writer)) => {
                        writer.close().await;
                        Err(e)
                    }
                    (Ok(reader), Err(e)) => {
                        reader.close().await;
                        Err(e)
                    }
                    (Err(e), Err(_)) => Err(e),
                }
            }
        }
    }

    /// Classify `sql` and dispatch it to the pool its classification requires.
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mode = classify(sql)?;
        let pool = self.route(mode)?;
        let conn = pool.get().await?;
        conn.query(sql, params).await
    }

    /// Classify and dispatch `sql`, deferring every failure into the result.
    ///
    /// This call itself never fails; parse, routing, and dispatch errors all
    /// surface when the [`DeferredRow`] is read.
    pub async fn query_row(&self, sql: &str, params: &[Value]) -> DeferredRow {
        let outcome = async {
            let mode = classify(sql)?;
            let pool = self.route(mode)?;
            let conn = pool.get().await?;
            conn.query_one(sql, params).await
        }
        .await;

        DeferredRow { outcome }
    }

    /// Execute a statement on the writer.
    ///
    /// Execution is categorically write-capable, so this never consults the
    /// classifier and requires the writer pool regardless of the SQL text.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let pool = self.writer.as_ref().ok_or(Error::WriterUnavailable)?;
        let conn = pool.get().await?;
        conn.execute(sql, params).await
    }

    /// Begin a transaction on the writer.
    pub async fn begin(&self) -> Result<OpenTransaction> {
        let pool = self.writer.as_ref().ok_or(Error::WriterUnavailable)?;
        let conn = pool.get().await?;
        let inner = conn.begin().await?;
        Ok(OpenTransaction { inner, _conn: conn })
    }

    /// Run `work` inside a writer transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back when it returns `Err`;
    /// exactly one of the two happens. A rollback failure is logged and the
    /// original error from `work` is returned.
    pub async fn begin_func<T, F>(&self, work: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t OpenTransaction) -> BoxFuture<'t, Result<T>>,
    {
        let tx = self.begin().await?;

        match work(&tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Ping every installed pool concurrently.
    ///
    /// Both probes run to completion; the reader's error wins when both fail.
    /// With no pools installed this is a no-op.
    pub async fn ping(&self) -> Result<()> {
        let read = async {
            match &self.reader {
                Some(pool) => pool.ping().await,
                None => Ok(()),
            }
        };
        let write = async {
            match &self.writer {
                Some(pool) => pool.ping().await,
                None => Ok(()),
            }
        };

        let (read, write) = tokio::join!(read, write);
        read?;
        write
    }

    /// Close whichever pools are installed. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(pool) = self.reader.take() {
            pool.close().await;
        }
        if let Some(pool) = self.writer.take() {
            pool.close().await;
        }
    }

    async fn establish(&self, secret_name: &str) -> Result<Arc<Pool>> {
        let record = self.provider.fetch(secret_name).await?;
        let tokens = self.provider.token_cache(&record);

        let pool = Pool::new(
            self.pool_config.clone(),
            PoolCredentials { record, tokens },
            Arc::clone(&self.factory),
        );
        pool.ping().await?;

        info!(secret = secret_name, "database pool connected");
        Ok(pool)
    }

    async fn install_reader(&mut self, pool: Arc<Pool>) {
        if let Some(old) = self.reader.replace(pool) {
            old.close().await;
        }
    }

    async fn install_writer(&mut self, pool: Arc<Pool>) {
        if let Some(old) = self.writer.replace(pool) {
            old.close().await;
        }
    }

    fn route(&self, mode: AccessMode) -> Result<&Arc<Pool>> {
        if mode.is_write() {
            self.writer.as_ref().ok_or(Error::WriterUnavailable)
        } else {
            self.reader.as_ref().ok_or(Error::ReaderUnavailable)
        }
    }
}
