//! OAuth2 client-credentials authentication with opaque tokens.

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use super::strategy::{AuthStrategy, Credentials, constant_time_eq};
use crate::error::{Error, Result};

/// Default access token lifetime: 1 hour
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 3600;

/// OAuth2 client-credentials strategy.
///
/// Acts as its own authorization server: registered clients exchange their
/// id and secret for an opaque access token tracked in memory.
pub struct OAuth2Strategy {
    clients: RwLock<HashMap<String, String>>,
    tokens: RwLock<HashMap<String, IssuedToken>>,
    token_ttl: Duration,
    sequence: AtomicU64,
}

#[derive(Debug, Clone)]
struct IssuedToken {
    client_id: String,
    expires_at: DateTime<Utc>,
}

impl Default for OAuth2Strategy {
    fn default() -> Self {
        Self::new()
    }
}

impl OAuth2Strategy {
    pub const NAME: &'static str = "oauth2";

    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            token_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS),
            sequence: AtomicU64::new(0),
        }
    }

    /// Register a client.
    pub fn client(self, client_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.clients
            .write()
            .unwrap()
            .insert(client_id.into(), secret.into());
        self
    }

    /// Set access token lifetime.
    pub fn token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Client a live token was issued to.
    pub fn token_owner(&self, token: &str) -> Option<String> {
        let tokens = self.tokens.read().unwrap();
        tokens
            .get(token)
            .filter(|t| t.expires_at > Utc::now())
            .map(|t| t.client_id.clone())
    }

    fn check_client(&self, client_id: &str, secret: &str) -> bool {
        self.clients
            .read()
            .unwrap()
            .get(client_id)
            .is_some_and(|expected| constant_time_eq(expected.as_bytes(), secret.as_bytes()))
    }

    fn mint(&self, client_id: &str) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(client_id.as_bytes());
        hasher.update(nanos.to_le_bytes());
        hasher.update(seq.to_le_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize().as_slice())
    }
}

#[async_trait]
impl AuthStrategy for OAuth2Strategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<bool> {
        match credentials {
            Credentials::ClientCredentials {
                client_id,
                client_secret,
            } => Ok(self.check_client(client_id, client_secret)),
            Credentials::Token(token) => self.validate_token(token).await,
            _ => Ok(false),
        }
    }

    async fn validate_token(&self, token: &str) -> Result<bool> {
        let expired = {
            let tokens = self.tokens.read().unwrap();
            match tokens.get(token) {
                None => return Ok(false),
                Some(issued) => issued.expires_at <= Utc::now(),
            }
        };
        if expired {
            self.tokens.write().unwrap().remove(token);
            return Ok(false);
        }
        Ok(true)
    }

    async fn generate_token(&self, credentials: &Credentials) -> Result<String> {
        let Credentials::ClientCredentials {
            client_id,
            client_secret,
        } = credentials
        else {
            return Err(Error::AccessDenied(
                "oauth2 requires client credentials".to_string(),
            ));
        };
        if !self.check_client(client_id, client_secret) {
            return Err(Error::AccessDenied("invalid client".to_string()));
        }

        let token = self.mint(client_id);
        self.tokens.write().unwrap().insert(
            token.clone(),
            IssuedToken {
                client_id: client_id.clone(),
                expires_at: Utc::now() + self.token_ttl,
            },
        );
        Ok(token)
    }

    async fn revoke_token(&self, token: &str) -> Result<()> {
        self.tokens.write().unwrap().remove(token);
        Ok(())
    }
}
