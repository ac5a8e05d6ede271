//! Tests for credential retrieval and token caching

use async_trait::async_trait;
use pgsplit::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ==================== Mocks ====================

struct StaticSecretStore {
    doc: Option<String>,
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String> {
        self.doc
            .clone()
            .ok_or_else(|| Error::secret(name, "secret not found"))
    }
}

#[derive(Default)]
struct CountingTokenSource {
    calls: AtomicUsize,
}

impl CountingTokenSource {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for CountingTokenSource {
    async fn auth_token(&self, host: &str, user: &str, port: u16) -> Result<SecretString> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SecretString::from(format!("{host}:{port}/{user}#{n}")))
    }
}

fn provider_with(
    doc: Option<&str>,
    tokens: Arc<CountingTokenSource>,
) -> CredentialProvider {
    CredentialProvider::new(
        Arc::new(StaticSecretStore {
            doc: doc.map(str::to_string),
        }) as Arc<dyn SecretStore>,
        tokens as Arc<dyn TokenSource>,
    )
}

fn record() -> CredentialRecord {
    CredentialRecord {
        username: "app".into(),
        engine: "postgres".into(),
        host: "db.internal".into(),
        port: 5432,
        dbname: "core".into(),
    }
}

// ==================== Fetch Tests ====================

#[tokio::test]
async fn test_fetch_decodes_credential_document() {
    let provider = provider_with(
        Some(r#"{"username":"app","engine":"postgres","host":"db.internal","port":5432,"dbname":"core"}"#),
        Arc::new(CountingTokenSource::default()),
    );

    let record = provider.fetch("core_iam_user_read").await.unwrap();
    assert_eq!(record.username, "app");
    assert_eq!(record.host, "db.internal");
    assert_eq!(record.port, 5432);
    assert_eq!(record.dbname, "core");
}

#[tokio::test]
async fn test_fetch_propagates_store_failure() {
    let provider = provider_with(None, Arc::new(CountingTokenSource::default()));

    let err = provider.fetch("core_iam_user_read").await.unwrap_err();
    match err {
        Error::Secret { name, .. } => assert_eq!(name, "core_iam_user_read"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_fetch_wraps_malformed_document() {
    let provider = provider_with(Some("not json"), Arc::new(CountingTokenSource::default()));

    let err = provider.fetch("core_iam_user_write").await.unwrap_err();
    // The decode failure is kept as the source chain.
    assert!(std::error::Error::source(&err).is_some());
    match err {
        Error::Secret { name, .. } => assert_eq!(name, "core_iam_user_write"),
        other => panic!("unexpected error: {other}"),
    }
}

// ==================== Token Cache Tests ====================

#[tokio::test]
async fn test_token_cache_mints_once_while_fresh() {
    let tokens = Arc::new(CountingTokenSource::default());
    let provider = provider_with(None, Arc::clone(&tokens));
    let cache = provider.token_cache(&record());

    let first = cache.current().await.unwrap();
    let second = cache.current().await.unwrap();

    assert_eq!(tokens.calls(), 1);
    assert_eq!(first.expose_secret(), second.expose_secret());
    assert_eq!(first.expose_secret(), "db.internal:5432/app#0");
}

#[tokio::test(start_paused = true)]
async fn test_token_cache_remints_after_expiry() {
    let tokens = Arc::new(CountingTokenSource::default());
    let provider = provider_with(None, Arc::clone(&tokens))
        .with_token_validity(Duration::from_secs(900))
        .with_refresh_margin(Duration::from_secs(10));
    let cache = provider.token_cache(&record());

    cache.current().await.unwrap();

    // Still inside the 890s cache window.
    tokio::time::advance(Duration::from_secs(889)).await;
    cache.current().await.unwrap();
    assert_eq!(tokens.calls(), 1);

    // Past it: a fresh token is minted before the old one can be rejected.
    tokio::time::advance(Duration::from_secs(2)).await;
    let token = cache.current().await.unwrap();
    assert_eq!(tokens.calls(), 2);
    assert_eq!(token.expose_secret(), "db.internal:5432/app#1");
}

#[tokio::test]
async fn test_token_cache_with_zero_lifetime_always_mints() {
    let tokens = Arc::new(CountingTokenSource::default());
    let provider = provider_with(None, Arc::clone(&tokens))
        .with_token_validity(Duration::from_secs(10))
        .with_refresh_margin(Duration::from_secs(10));
    let cache = provider.token_cache(&record());

    cache.current().await.unwrap();
    cache.current().await.unwrap();
    assert_eq!(tokens.calls(), 2);
}
