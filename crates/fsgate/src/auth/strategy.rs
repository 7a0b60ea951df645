//! Authentication strategy trait and the collaborators strategies depend on.

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::provider::ProviderConfig;

/// Credentials presented to a strategy.
///
/// `Debug` never prints secrets.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username and password
    Basic { username: String, password: String },
    /// Cloud access key pair
    AccessKey {
        access_key_id: String,
        secret_access_key: String,
    },
    /// OAuth2 client credentials grant
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
    /// Previously issued token
    Token(String),
}

impl Credentials {
    /// Extract backend credentials from a provider configuration.
    ///
    /// Recognized key sets, in order: `username`/`password`,
    /// `accessKeyId`/`secretAccessKey`, `clientId`/`clientSecret`, `token`.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let pair = |a: &str, b: &str| Some((config.get(a)?.clone(), config.get(b)?.clone()));

        if let Some((username, password)) = pair("username", "password") {
            return Ok(Credentials::Basic { username, password });
        }
        if let Some((access_key_id, secret_access_key)) = pair("accessKeyId", "secretAccessKey") {
            return Ok(Credentials::AccessKey {
                access_key_id,
                secret_access_key,
            });
        }
        if let Some((client_id, client_secret)) = pair("clientId", "clientSecret") {
            return Ok(Credentials::ClientCredentials {
                client_id,
                client_secret,
            });
        }
        if let Some(token) = config.get("token") {
            return Ok(Credentials::Token(token.clone()));
        }
        Err(Error::Configuration(
            "provider configuration has no credentials".to_string(),
        ))
    }

    /// Identity the credentials claim, if they carry one.
    pub fn principal(&self) -> Option<&str> {
        match self {
            Credentials::Basic { username, .. } => Some(username),
            Credentials::AccessKey { access_key_id, .. } => Some(access_key_id),
            Credentials::ClientCredentials { client_id, .. } => Some(client_id),
            Credentials::Token(_) => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Credentials::AccessKey { access_key_id, .. } => f
                .debug_struct("AccessKey")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"[REDACTED]")
                .finish(),
            Credentials::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .field("client_secret", &"[REDACTED]")
                .finish(),
            Credentials::Token(_) => f.write_str("Token([REDACTED])"),
        }
    }
}

/// Authentication strategy.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Name the strategy is registered under.
    fn name(&self) -> &str;

    /// Check credentials. Rejection is `Ok(false)`, not an error.
    async fn authenticate(&self, credentials: &Credentials) -> Result<bool>;

    /// Check a previously generated token.
    async fn validate_token(&self, token: &str) -> Result<bool>;

    /// Issue a token for valid credentials.
    ///
    /// Fails with [`Error::AccessDenied`] when the credentials are rejected.
    async fn generate_token(&self, credentials: &Credentials) -> Result<String>;

    /// Revoke a token. Revoking an unknown token is not an error.
    async fn revoke_token(&self, token: &str) -> Result<()>;
}

/// Password verification, owned by the credential store outside the gateway.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> Result<bool>;
}

/// Token minting and validation (e.g. a JWT service) outside the gateway.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Issue a token for `subject`.
    async fn issue(&self, subject: &str) -> Result<String>;

    /// Subject of a valid token, or `None`.
    async fn validate(&self, token: &str) -> Result<Option<String>>;

    /// Invalidate a token.
    async fn revoke(&self, token: &str) -> Result<()>;
}

/// Verifier over a fixed username/password table.
///
/// For development setups and tests; production deployments plug in a
/// verifier backed by their credential store.
#[derive(Default)]
pub struct StaticCredentialVerifier {
    users: RwLock<HashMap<String, String>>,
}

impl StaticCredentialVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user.
    pub fn user(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users
            .write()
            .unwrap()
            .insert(username.into(), password.into());
        self
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentialVerifier {
    async fn verify(&self, username: &str, password: &str) -> Result<bool> {
        let users = self.users.read().unwrap();
        Ok(users
            .get(username)
            .is_some_and(|expected| constant_time_eq(expected.as_bytes(), password.as_bytes())))
    }
}

/// Compare secrets without short-circuiting on the first differing byte.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
