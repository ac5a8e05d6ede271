//! # pgsplit
//!
//! Read/write-splitting PostgreSQL connector with IAM token refresh.
//!
//! A [`Connector`](connector::Connector) owns two role-bound connection
//! pools. Every SQL batch is parsed and classified before dispatch: batches
//! that only read route to the reader pool, batches that can write rows or
//! mutate schema route to the writer pool, and unparsable batches route
//! nowhere. Connection credentials come from a secret store, and the
//! connection password is a short-lived auth token minted lazily on the
//! pool's connect path and cached until shortly before expiry.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pgsplit::connector::{Connector, Role};
//! use pgsplit::credentials::CredentialProvider;
//! use pgsplit::postgres::PgConnectionFactory;
//!
//! # async fn run(secrets: Arc<dyn pgsplit::credentials::SecretStore>,
//! #              tokens: Arc<dyn pgsplit::credentials::TokenSource>)
//! #              -> pgsplit::Result<()> {
//! let provider = CredentialProvider::new(secrets, tokens);
//! let mut db = Connector::new(provider, Arc::new(PgConnectionFactory::default()));
//!
//! db.open(Role::ReadAndWrite).await?;
//!
//! let rows = db.query("SELECT id, name FROM users", &[]).await?;
//! db.execute("UPDATE users SET name = $1 WHERE id = $2", &["x".into(), 1i64.into()])
//!     .await?;
//!
//! db.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod classify;
pub mod connection;
pub mod connector;
pub mod credentials;
pub mod error;
pub mod pool;
pub mod postgres;
pub mod types;

pub use error::{Error, Result};
pub use types::{Row, Value};

/// Commonly used types
pub mod prelude {
    pub use crate::classify::{classify, AccessMode};
    pub use crate::connection::{ConnectSpec, Connection, ConnectionFactory, Transaction};
    pub use crate::connector::{Connector, DeferredRow, OpenTransaction, Role};
    pub use crate::credentials::{CredentialProvider, CredentialRecord, SecretStore, TokenSource};
    pub use crate::error::{Error, Result};
    pub use crate::pool::{Pool, PoolConfig, PoolStats};
    pub use crate::postgres::PgConnectionFactory;
    pub use crate::types::{Row, Value};
}
