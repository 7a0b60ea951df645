//! Access-key authentication with signed, expiring tokens.

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::RwLock;

use super::strategy::{AuthStrategy, Credentials, constant_time_eq};
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime: 1 hour
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Access key / secret key strategy, modeled on cloud IAM key pairs.
///
/// Token format: `base64url(access_key:expires_unix).base64url(hmac)`, where
/// the HMAC-SHA256 is keyed with the access key's secret. Tokens stop
/// validating when they expire, are revoked, or their key is removed.
///
/// Only live, correctly signed tokens are recorded as revoked, and records
/// are dropped once the token's own expiry passes.
pub struct IamAuthStrategy {
    keys: RwLock<HashMap<String, String>>,
    /// Signed payload of each revoked token, with its expiry
    revoked: RwLock<HashMap<String, i64>>,
    token_ttl: Duration,
}

impl Default for IamAuthStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl IamAuthStrategy {
    pub const NAME: &'static str = "iam";

    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            revoked: RwLock::new(HashMap::new()),
            token_ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
        }
    }

    /// Register an access key pair.
    pub fn key(self, access_key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.keys
            .write()
            .unwrap()
            .insert(access_key_id.into(), secret.into());
        self
    }

    /// Set token lifetime.
    pub fn token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Remove an access key; tokens signed with it stop validating.
    pub fn remove_key(&self, access_key_id: &str) {
        self.keys.write().unwrap().remove(access_key_id);
    }

    fn secret(&self, access_key_id: &str) -> Option<String> {
        self.keys.read().unwrap().get(access_key_id).cloned()
    }

    fn mac(secret: &str) -> Result<HmacSha256> {
        <HmacSha256 as KeyInit>::new_from_slice(secret.as_bytes())
            .map_err(|_| Error::Internal("invalid signing key".to_string()))
    }

    /// Signed payload and expiry of a live token, or `None` when the token
    /// is malformed, expired, or not signed by a known key.
    fn verify(&self, token: &str) -> Result<Option<(String, i64)>> {
        let Some((payload_b64, sig_b64)) = token.split_once('.') else {
            return Ok(None);
        };
        let (Ok(payload), Ok(signature)) = (
            URL_SAFE_NO_PAD.decode(payload_b64),
            URL_SAFE_NO_PAD.decode(sig_b64),
        ) else {
            return Ok(None);
        };
        let Ok(payload) = String::from_utf8(payload) else {
            return Ok(None);
        };
        let Some((access_key_id, expires)) = payload.rsplit_once(':') else {
            return Ok(None);
        };
        let Ok(expires) = expires.parse::<i64>() else {
            return Ok(None);
        };
        if expires <= Utc::now().timestamp() {
            return Ok(None);
        }
        let Some(secret) = self.secret(access_key_id) else {
            return Ok(None);
        };

        let mut mac = Self::mac(&secret)?;
        mac.update(payload.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            return Ok(None);
        }
        Ok(Some((payload, expires)))
    }

    /// Forget revocations of tokens that have expired by `now`.
    fn prune_revoked(&self, now: i64) {
        self.revoked
            .write()
            .unwrap()
            .retain(|_, expires| *expires > now);
    }
}

#[async_trait]
impl AuthStrategy for IamAuthStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<bool> {
        match credentials {
            Credentials::AccessKey {
                access_key_id,
                secret_access_key,
            } => Ok(self.secret(access_key_id).is_some_and(|expected| {
                constant_time_eq(expected.as_bytes(), secret_access_key.as_bytes())
            })),
            Credentials::Token(token) => self.validate_token(token).await,
            _ => Ok(false),
        }
    }

    async fn validate_token(&self, token: &str) -> Result<bool> {
        let Some((payload, _)) = self.verify(token)? else {
            return Ok(false);
        };
        Ok(!self.revoked.read().unwrap().contains_key(&payload))
    }

    async fn generate_token(&self, credentials: &Credentials) -> Result<String> {
        let Credentials::AccessKey {
            access_key_id,
            secret_access_key,
        } = credentials
        else {
            return Err(Error::AccessDenied(
                "iam auth requires an access key pair".to_string(),
            ));
        };
        if !self.authenticate(credentials).await? {
            return Err(Error::AccessDenied("invalid access key".to_string()));
        }

        let expires = (Utc::now() + self.token_ttl).timestamp();
        let payload = format!("{}:{}", access_key_id, expires);
        let mut mac = Self::mac(secret_access_key)?;
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature.as_slice())
        ))
    }

    async fn revoke_token(&self, token: &str) -> Result<()> {
        self.prune_revoked(Utc::now().timestamp());
        // Anything that fails verification is already rejected
        if let Some((payload, expires)) = self.verify(token)? {
            self.revoked.write().unwrap().insert(payload, expires);
        }
        Ok(())
    }
}
