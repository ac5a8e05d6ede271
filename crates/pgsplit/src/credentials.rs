//! Credential retrieval and IAM token caching
//!
//! The connector depends on two narrow external contracts: a secret store
//! that resolves a named secret to a JSON credential document, and a token
//! source that mints short-lived auth tokens for a host/user/port. Both are
//! traits so the pool layer can be exercised without any cloud access.
//!
//! Tokens are refreshed lazily at connection-open time. A cached token is
//! reused until `validity - margin` has elapsed, so a token is always
//! replaced slightly before the authority would reject it. There is no
//! background refresh timer; the pool's idle-lifetime policy forces periodic
//! reconnection instead.

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Default token validity window assumed for the auth authority (15 minutes)
pub const DEFAULT_TOKEN_VALIDITY: Duration = Duration::from_secs(900);

/// Safety margin subtracted from the validity window when caching a token
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(10);

/// Connection parameters decoded from a secret document.
///
/// The schema is fixed: documents with unknown or missing fields are a
/// decode error, never silently accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialRecord {
    /// Database user name
    pub username: String,
    /// Database engine identifier (informational)
    pub engine: String,
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database name
    pub dbname: String,
}

/// Retrieves a named secret as a JSON document
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Resolve `name` to the secret's string payload
    async fn get_secret(&self, name: &str) -> Result<String>;
}

/// Mints short-lived auth tokens usable as a connection password
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Mint a token for the given endpoint and user
    async fn auth_token(&self, host: &str, user: &str, port: u16) -> Result<SecretString>;
}

/// Resolves credential records and hands out token caches for pools.
///
/// All configuration (token validity, refresh margin) is explicit; there is
/// no process-global state.
pub struct CredentialProvider {
    secrets: Arc<dyn SecretStore>,
    tokens: Arc<dyn TokenSource>,
    token_validity: Duration,
    refresh_margin: Duration,
}

impl CredentialProvider {
    /// Create a provider over the given external contracts
    pub fn new(secrets: Arc<dyn SecretStore>, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            secrets,
            tokens,
            token_validity: DEFAULT_TOKEN_VALIDITY,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
        }
    }

    /// Override the assumed token validity window
    pub fn with_token_validity(mut self, validity: Duration) -> Self {
        self.token_validity = validity;
        self
    }

    /// Override the refresh safety margin
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// The configured token validity window
    pub fn token_validity(&self) -> Duration {
        self.token_validity
    }

    /// Fetch and decode the named secret.
    ///
    /// Retrieval failures surface verbatim; decode failures are wrapped with
    /// the secret name. Nothing is retried here.
    pub async fn fetch(&self, name: &str) -> Result<CredentialRecord> {
        let raw = self.secrets.get_secret(name).await?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::secret_with_source(name, "malformed credential document", e))
    }

    /// Build a token cache bound to one credential record, for use by a
    /// single pool's connect path.
    pub fn token_cache(&self, record: &CredentialRecord) -> TokenCache {
        TokenCache {
            tokens: Arc::clone(&self.tokens),
            host: record.host.clone(),
            user: record.username.clone(),
            port: record.port,
            lifetime: self.token_validity.saturating_sub(self.refresh_margin),
            state: Mutex::new(None),
        }
    }
}

struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

/// Caches a minted token until shortly before the authority would reject it.
///
/// Owned by a single pool; refresh only happens inside the pool's connect
/// path, and the mutex serializes concurrent connection establishment so at
/// most one mint is in flight per pool.
pub struct TokenCache {
    tokens: Arc<dyn TokenSource>,
    host: String,
    user: String,
    port: u16,
    lifetime: Duration,
    state: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    /// Return the cached token, minting a fresh one if it has expired.
    pub async fn current(&self) -> Result<SecretString> {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let token = self
            .tokens
            .auth_token(&self.host, &self.user, self.port)
            .await?;
        *state = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + self.lifetime,
        });

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_decodes_fixed_schema() {
        let record: CredentialRecord = serde_json::from_str(
            r#"{"username":"app","engine":"postgres","host":"db.internal","port":5432,"dbname":"core"}"#,
        )
        .unwrap();
        assert_eq!(record.username, "app");
        assert_eq!(record.port, 5432);
    }

    #[test]
    fn test_record_rejects_unknown_fields() {
        let result: std::result::Result<CredentialRecord, _> = serde_json::from_str(
            r#"{"username":"app","engine":"postgres","host":"h","port":5432,"dbname":"d","extra":1}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_record_rejects_missing_fields() {
        let result: std::result::Result<CredentialRecord, _> =
            serde_json::from_str(r#"{"username":"app"}"#);
        assert!(result.is_err());
    }
}
