//! Bearer-token authentication backed by an external token issuer.

use async_trait::async_trait;
use std::sync::Arc;

use super::strategy::{AuthStrategy, CredentialVerifier, Credentials, TokenIssuer};
use crate::error::{Error, Result};

/// Bearer-token strategy.
///
/// Token minting and validation belong to the [`TokenIssuer`] (typically a
/// JWT service). When a [`CredentialVerifier`] is attached, username and
/// password can be exchanged for a token.
pub struct BearerTokenStrategy {
    issuer: Arc<dyn TokenIssuer>,
    verifier: Option<Arc<dyn CredentialVerifier>>,
}

impl BearerTokenStrategy {
    pub const NAME: &'static str = "bearer";

    pub fn new(issuer: Arc<dyn TokenIssuer>) -> Self {
        Self {
            issuer,
            verifier: None,
        }
    }

    /// Allow password login in exchange for a token.
    pub fn with_verifier(mut self, verifier: Arc<dyn CredentialVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }
}

#[async_trait]
impl AuthStrategy for BearerTokenStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<bool> {
        match (credentials, &self.verifier) {
            (Credentials::Token(token), _) => self.validate_token(token).await,
            (Credentials::Basic { username, password }, Some(verifier)) => {
                verifier.verify(username, password).await
            }
            _ => Ok(false),
        }
    }

    async fn validate_token(&self, token: &str) -> Result<bool> {
        Ok(self.issuer.validate(token).await?.is_some())
    }

    async fn generate_token(&self, credentials: &Credentials) -> Result<String> {
        let subject = match credentials {
            Credentials::Token(token) => self.issuer.validate(token).await?,
            Credentials::Basic { username, .. } if self.authenticate(credentials).await? => {
                Some(username.clone())
            }
            _ => None,
        };
        match subject {
            Some(subject) => self.issuer.issue(&subject).await,
            None => Err(Error::AccessDenied("invalid credentials".to_string())),
        }
    }

    async fn revoke_token(&self, token: &str) -> Result<()> {
        self.issuer.revoke(token).await
    }
}
