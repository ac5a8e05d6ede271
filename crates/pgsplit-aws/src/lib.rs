//! # pgsplit-aws
//!
//! AWS implementations of the two external contracts `pgsplit` consumes:
//! [`SecretsManagerStore`] resolves credential documents from AWS Secrets
//! Manager, and [`RdsTokenSigner`] mints RDS IAM auth tokens by
//! SigV4-presigning the RDS connect action.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pgsplit::connector::{Connector, Role};
//! use pgsplit::credentials::CredentialProvider;
//! use pgsplit::postgres::PgConnectionFactory;
//! use pgsplit_aws::{RdsTokenSigner, SecretsManagerStore};
//!
//! # async fn run() -> pgsplit::Result<()> {
//! let secrets = Arc::new(SecretsManagerStore::from_env().await);
//! let tokens = Arc::new(RdsTokenSigner::from_env().await?);
//!
//! let provider = CredentialProvider::new(secrets, tokens);
//! let mut db = Connector::new(provider, Arc::new(PgConnectionFactory::default()));
//! db.open(Role::ReadAndWrite).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{
    sign, SignableBody, SignableRequest, SignatureLocation, SigningSettings,
};
use aws_sigv4::sign::v4;
use secrecy::SecretString;
use std::time::{Duration, SystemTime};

use pgsplit::credentials::{SecretStore, TokenSource};
use pgsplit::{Error, Result};

/// Validity window RDS grants a presigned auth token
const TOKEN_EXPIRY: Duration = Duration::from_secs(900);

/// [`SecretStore`] over AWS Secrets Manager.
///
/// Fetches the current version (`AWSCURRENT`) of a named secret and expects
/// a string payload.
pub struct SecretsManagerStore {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretsManagerStore {
    /// Wrap an existing Secrets Manager client
    pub fn new(client: aws_sdk_secretsmanager::Client) -> Self {
        Self { client }
    }

    /// Build a store from the shared AWS environment configuration
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(aws_sdk_secretsmanager::Client::new(&config))
    }
}

#[async_trait]
impl SecretStore for SecretsManagerStore {
    async fn get_secret(&self, name: &str) -> Result<String> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(name)
            .version_stage("AWSCURRENT")
            .send()
            .await
            .map_err(|e| Error::secret_with_source(name, "failed to retrieve secret", e))?;

        output
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| Error::secret(name, "secret has no string payload"))
    }
}

/// [`TokenSource`] minting RDS IAM auth tokens.
///
/// A token is the SigV4-presigned form of
/// `https://{host}:{port}/?Action=connect&DBUser={user}` (scheme stripped),
/// signed for the `rds-db` service with a 15-minute expiry. The region and
/// credentials provider are fixed at construction.
pub struct RdsTokenSigner {
    credentials: SharedCredentialsProvider,
    region: String,
}

impl RdsTokenSigner {
    /// Build a signer over an explicit credentials provider and region
    pub fn new(credentials: SharedCredentialsProvider, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
        }
    }

    /// Build a signer from the shared AWS environment configuration.
    ///
    /// Fails when the environment resolves no region or no credentials
    /// provider; the signer never falls back to a default region.
    pub async fn from_env() -> Result<Self> {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let credentials = config
            .credentials_provider()
            .ok_or_else(|| Error::token("aws config resolves no credentials provider"))?;
        let region = config
            .region()
            .ok_or_else(|| Error::token("aws config resolves no region"))?
            .to_string();
        Ok(Self::new(credentials, region))
    }
}

#[async_trait]
impl TokenSource for RdsTokenSigner {
    async fn auth_token(&self, host: &str, user: &str, port: u16) -> Result<SecretString> {
        let credentials = self
            .credentials
            .provide_credentials()
            .await
            .map_err(|e| Error::token_with_source("failed to resolve aws credentials", e))?;
        let identity = credentials.into();

        let mut settings = SigningSettings::default();
        settings.expires_in = Some(TOKEN_EXPIRY);
        settings.signature_location = SignatureLocation::QueryParams;

        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name("rds-db")
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .map_err(|e| Error::token_with_source("invalid signing parameters", e))?;

        let endpoint = format!("https://{host}:{port}/?Action=connect&DBUser={user}");
        let request =
            SignableRequest::new("GET", &endpoint, std::iter::empty(), SignableBody::Bytes(&[]))
                .map_err(|e| Error::token_with_source("unsignable token request", e))?;

        let (instructions, _signature) = sign(request, &params.into())
            .map_err(|e| Error::token_with_source("token signing failed", e))?
            .into_parts();

        let mut url = url::Url::parse(&endpoint)
            .map_err(|e| Error::token_with_source("invalid token endpoint", e))?;
        for (name, value) in instructions.params() {
            url.query_pairs_mut().append_pair(name, value);
        }

        // RDS expects the token without the scheme.
        let mut token = url.to_string();
        Ok(SecretString::from(token.split_off("https://".len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_credential_types::Credentials;
    use secrecy::ExposeSecret;

    fn static_signer() -> RdsTokenSigner {
        let credentials = Credentials::new("AKIATESTACCESSKEY", "testsecret", None, None, "test");
        RdsTokenSigner::new(SharedCredentialsProvider::new(credentials), "eu-west-1")
    }

    #[tokio::test]
    async fn test_token_shape() {
        let signer = static_signer();
        let token = signer.auth_token("db.internal", "app", 5432).await.unwrap();
        let token = token.expose_secret();

        assert!(token.starts_with("db.internal:5432/?"));
        assert!(!token.contains("https://"));
        assert!(token.contains("Action=connect"));
        assert!(token.contains("DBUser=app"));
        assert!(token.contains("X-Amz-Signature="));
        assert!(token.contains("X-Amz-Expires=900"));
        assert!(token.contains("X-Amz-Credential="));
    }

    #[tokio::test]
    async fn test_tokens_are_endpoint_specific() {
        let signer = static_signer();
        let a = signer.auth_token("db-a", "app", 5432).await.unwrap();
        let b = signer.auth_token("db-b", "app", 5432).await.unwrap();
        assert_ne!(a.expose_secret(), b.expose_secret());
    }
}
