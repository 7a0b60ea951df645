//! HTTP Basic style authentication.

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use super::strategy::{AuthStrategy, CredentialVerifier, Credentials};
use crate::error::{Error, Result};

/// Username/password strategy.
///
/// Tokens are base64 `username:password`, as in the HTTP Basic scheme, and
/// are re-verified on every validation. Revocation applies to the decoded
/// credential pair, so re-encodings of a revoked token (surrounding
/// whitespace and the like) stay revoked until a new token is issued for it.
pub struct BasicAuthStrategy {
    verifier: Arc<dyn CredentialVerifier>,
    /// SHA-256 of `username:password` for revoked tokens
    revoked: RwLock<HashSet<[u8; 32]>>,
}

impl BasicAuthStrategy {
    pub const NAME: &'static str = "basic";

    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            verifier,
            revoked: RwLock::new(HashSet::new()),
        }
    }

    fn decode(token: &str) -> Option<(String, String)> {
        let raw = STANDARD.decode(token.trim()).ok()?;
        let text = String::from_utf8(raw).ok()?;
        let (user, pass) = text.split_once(':')?;
        Some((user.to_string(), pass.to_string()))
    }

    fn fingerprint(user: &str, pass: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(user.as_bytes());
        hasher.update(b":");
        hasher.update(pass.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }
}

#[async_trait]
impl AuthStrategy for BasicAuthStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<bool> {
        match credentials {
            Credentials::Basic { username, password } => {
                self.verifier.verify(username, password).await
            }
            Credentials::Token(token) => self.validate_token(token).await,
            _ => Ok(false),
        }
    }

    async fn validate_token(&self, token: &str) -> Result<bool> {
        let Some((user, pass)) = Self::decode(token) else {
            return Ok(false);
        };
        if self
            .revoked
            .read()
            .unwrap()
            .contains(&Self::fingerprint(&user, &pass))
        {
            return Ok(false);
        }
        self.verifier.verify(&user, &pass).await
    }

    async fn generate_token(&self, credentials: &Credentials) -> Result<String> {
        let Credentials::Basic { username, password } = credentials else {
            return Err(Error::AccessDenied(
                "basic auth requires username and password".to_string(),
            ));
        };
        if !self.verifier.verify(username, password).await? {
            return Err(Error::AccessDenied("invalid credentials".to_string()));
        }
        self.revoked
            .write()
            .unwrap()
            .remove(&Self::fingerprint(username, password));
        Ok(STANDARD.encode(format!("{}:{}", username, password)))
    }

    /// Undecodable tokens never validate, so revoking one is a no-op.
    async fn revoke_token(&self, token: &str) -> Result<()> {
        if let Some((user, pass)) = Self::decode(token) {
            self.revoked
                .write()
                .unwrap()
                .insert(Self::fingerprint(&user, &pass));
        }
        Ok(())
    }
}
