//! Error types for pgsplit
//!
//! The routing sentinels (`ReaderUnavailable`, `WriterUnavailable`,
//! `InvalidRole`) are stable conditions that callers match on to decide
//! fallback behavior. Everything else carries contextual text plus the
//! underlying cause as a `#[source]` for logging.

use thiserror::Error;

/// Result type for pgsplit operations
pub type Result<T> = std::result::Result<T, Error>;

type BoxedCause = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for pgsplit
#[derive(Error, Debug)]
pub enum Error {
    /// No reader pool has been established on this connector
    #[error("reader pool not created")]
    ReaderUnavailable,

    /// No writer pool has been established on this connector
    #[error("writer pool not created")]
    WriterUnavailable,

    /// Requested role is not one of read, write, or readAndWrite
    #[error("invalid role {value:?}: read, write, or readAndWrite not provided")]
    InvalidRole {
        /// The rejected role string
        value: String,
    },

    /// Secret retrieval or decoding failed
    #[error("secret {name:?}: {message}")]
    Secret {
        /// Secret id that was requested
        name: String,
        /// What failed for this secret
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<BoxedCause>,
    },

    /// Auth token minting failed
    #[error("auth token: {message}")]
    Token {
        /// What failed while minting
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<BoxedCause>,
    },

    /// Physical connection or pool establishment failed
    #[error("connection error: {message}")]
    Connection {
        /// What failed while connecting
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<BoxedCause>,
    },

    /// SQL could not be parsed for routing
    #[error("could not parse sql string")]
    Parse {
        /// The parser's diagnostic
        #[source]
        source: sqlparser::parser::ParserError,
    },

    /// Query dispatch failed
    #[error("query error: {message}")]
    Query {
        /// What failed during dispatch
        message: String,
        /// The SQL that was being dispatched, when known
        sql: Option<String>,
        /// Underlying cause, if any
        #[source]
        source: Option<BoxedCause>,
    },

    /// Transaction begin/commit/rollback failed
    #[error("transaction error: {message}")]
    Transaction {
        /// Which transaction step failed
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<BoxedCause>,
    },

    /// Pool has been shut down
    #[error("pool is closed")]
    PoolClosed,

    /// No connection could be acquired within the configured timeout
    #[error("pool exhausted: {message}")]
    PoolExhausted {
        /// How long the acquisition waited
        message: String,
    },

    /// A deferred row was read but the query selected no rows
    #[error("no rows in result set")]
    NoRows,
}

#[allow(missing_docs)]
impl Error {
    pub fn invalid_role(value: impl Into<String>) -> Self {
        Self::InvalidRole {
            value: value.into(),
        }
    }

    pub fn secret(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Secret {
            name: name.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn secret_with_source(
        name: impl Into<String>,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Secret {
            name: name.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn token(message: impl Into<String>) -> Self {
        Self::Token {
            message: message.into(),
            source: None,
        }
    }

    pub fn token_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Token {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn parse(source: sqlparser::parser::ParserError) -> Self {
        Self::Parse { source }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Whether this is one of the pool-absence routing sentinels
    #[inline]
    pub fn is_routing(&self) -> bool {
        matches!(self, Self::ReaderUnavailable | Self::WriterUnavailable)
    }
}
