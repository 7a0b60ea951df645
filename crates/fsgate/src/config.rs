//! Gateway configuration file.
//!
//! JSON document describing providers, cache and ACL settings, permission
//! seeds, auth strategies and their bindings:
//!
//! ```json
//! {
//!   "providers": [
//!     { "id": "docs", "type": "local", "configuration": { "basePath": "/srv/docs" } },
//!     { "id": "scratch", "type": "memory" }
//!   ],
//!   "cache": { "contentTtlSecs": 300, "listingTtlSecs": 30 },
//!   "acl": { "ttlSecs": 300 },
//!   "permissions": [ { "username": "alice", "permission": "read:reports" } ],
//!   "authStrategies": [
//!     { "type": "iam", "keys": { "AKIDEXAMPLE": "wJalrXUtnFEMI" }, "tokenTtlSecs": 900 }
//!   ],
//!   "authBindings": { "s3": "iam" },
//!   "requestTimeoutMs": 5000
//! }
//! ```
//!
//! A binding must name a strategy declared under `authStrategies` or
//! registered on the [`GatewayBuilder`](crate::GatewayBuilder).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::acl::{DEFAULT_ACL_TTL, Permission};
use crate::auth::{
    AuthStrategy, BasicAuthStrategy, IamAuthStrategy, OAuth2Strategy, StaticCredentialVerifier,
};
use crate::cache::CacheConfig;
use crate::error::{Error, Result};
use crate::provider::{ProviderDescriptor, ProviderType};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub providers: Vec<ProviderDescriptor>,
    pub cache: CacheConfig,
    pub acl: AclConfig,
    /// Grants added to the permission store at startup
    pub permissions: Vec<PermissionGrant>,
    /// Strategies registered at startup
    pub auth_strategies: Vec<StrategyConfig>,
    /// Provider type name to auth strategy name
    pub auth_bindings: BTreeMap<String, String>,
    /// Per-request provider timeout; none when absent
    pub request_timeout_ms: Option<u64>,
}

/// Access control settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AclConfig {
    /// Lifetime of a cached user entry
    #[serde(rename = "ttlSecs", with = "duration_secs")]
    pub ttl: Duration,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_ACL_TTL,
        }
    }
}

/// One seeded grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub username: String,
    pub permission: String,
}

/// A built-in auth strategy and its credentials, tagged by strategy name.
///
/// Bearer tokens need an embedder-supplied issuer and can only be registered
/// through the builder.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StrategyConfig {
    /// Username to password
    Basic { users: BTreeMap<String, String> },
    /// Access key id to secret
    #[serde(rename_all = "camelCase")]
    Iam {
        keys: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_ttl_secs: Option<i64>,
    },
    /// Client id to client secret
    #[serde(rename_all = "camelCase")]
    Oauth2 {
        clients: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_ttl_secs: Option<i64>,
    },
}

impl StrategyConfig {
    /// Name the strategy registers under.
    pub fn name(&self) -> &'static str {
        match self {
            StrategyConfig::Basic { .. } => BasicAuthStrategy::NAME,
            StrategyConfig::Iam { .. } => IamAuthStrategy::NAME,
            StrategyConfig::Oauth2 { .. } => OAuth2Strategy::NAME,
        }
    }

    pub fn build(&self) -> Arc<dyn AuthStrategy> {
        match self {
            StrategyConfig::Basic { users } => {
                let verifier = users
                    .iter()
                    .fold(StaticCredentialVerifier::new(), |v, (user, pass)| {
                        v.user(user, pass)
                    });
                Arc::new(BasicAuthStrategy::new(Arc::new(verifier)))
            }
            StrategyConfig::Iam {
                keys,
                token_ttl_secs,
            } => {
                let mut strategy = keys
                    .iter()
                    .fold(IamAuthStrategy::new(), |s, (id, secret)| s.key(id, secret));
                if let Some(secs) = token_ttl_secs {
                    strategy = strategy.token_ttl(chrono::Duration::seconds(*secs));
                }
                Arc::new(strategy)
            }
            StrategyConfig::Oauth2 {
                clients,
                token_ttl_secs,
            } => {
                let mut strategy = clients
                    .iter()
                    .fold(OAuth2Strategy::new(), |s, (id, secret)| s.client(id, secret));
                if let Some(secs) = token_ttl_secs {
                    strategy = strategy.token_ttl(chrono::Duration::seconds(*secs));
                }
                Arc::new(strategy)
            }
        }
    }

    fn token_ttl_secs(&self) -> Option<i64> {
        match self {
            StrategyConfig::Basic { .. } => None,
            StrategyConfig::Iam { token_ttl_secs, .. }
            | StrategyConfig::Oauth2 { token_ttl_secs, .. } => *token_ttl_secs,
        }
    }
}

// Secrets stay out of debug output
impl fmt::Debug for StrategyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let principals: Vec<&String> = match self {
            StrategyConfig::Basic { users } => users.keys().collect(),
            StrategyConfig::Iam { keys, .. } => keys.keys().collect(),
            StrategyConfig::Oauth2 { clients, .. } => clients.keys().collect(),
        };
        f.debug_struct("StrategyConfig")
            .field("type", &self.name())
            .field("principals", &principals)
            .finish()
    }
}

impl GatewayConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid gateway config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Per-request timeout, if configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Auth bindings with parsed provider types.
    pub fn parsed_auth_bindings(&self) -> Result<Vec<(ProviderType, String)>> {
        self.auth_bindings
            .iter()
            .map(|(provider_type, strategy)| {
                Ok((provider_type.parse::<ProviderType>()?, strategy.clone()))
            })
            .collect()
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err(Error::Configuration("provider id is empty".to_string()));
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(Error::Configuration(format!(
                    "duplicate provider id '{}'",
                    provider.id
                )));
            }
        }
        for grant in &self.permissions {
            if grant.username.is_empty() {
                return Err(Error::Configuration(
                    "permission grant has no username".to_string(),
                ));
            }
            Permission::parse(&grant.permission)?;
        }
        let mut strategies = HashSet::new();
        for strategy in &self.auth_strategies {
            if !strategies.insert(strategy.name()) {
                return Err(Error::Configuration(format!(
                    "auth strategy '{}' declared twice",
                    strategy.name()
                )));
            }
            if strategy.token_ttl_secs().is_some_and(|secs| secs <= 0) {
                return Err(Error::Configuration(format!(
                    "auth strategy '{}': tokenTtlSecs must be positive",
                    strategy.name()
                )));
            }
        }
        self.parsed_auth_bindings()?;
        if self.request_timeout_ms == Some(0) {
            return Err(Error::Configuration(
                "requestTimeoutMs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serde helper: `Duration` as (fractional) seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_full_document() {
        let config = GatewayConfig::from_json(
            r#"{
                "providers": [
                    { "id": "docs", "type": "local", "configuration": { "basePath": "/srv/docs" } },
                    { "id": "scratch", "type": "memory", "isActive": false }
                ],
                "cache": { "contentTtlSecs": 1.5, "maxEntries": 10 },
                "acl": { "ttlSecs": 60 },
                "permissions": [ { "username": "alice", "permission": "read:reports" } ],
                "authBindings": { "s3": "iam" },
                "requestTimeoutMs": 2500
            }"#,
        )
        .unwrap();

        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].configuration["basePath"], "/srv/docs");
        assert!(!config.providers[1].is_active);
        assert_eq!(config.cache.content_ttl, Duration::from_millis(1500));
        assert_eq!(config.cache.max_entries, 10);
        assert_eq!(config.cache.listing_ttl, crate::cache::DEFAULT_LISTING_TTL);
        assert_eq!(config.acl.ttl, Duration::from_secs(60));
        assert_eq!(
            config.parsed_auth_bindings().unwrap(),
            vec![(ProviderType::S3, "iam".to_string())]
        );
        assert_eq!(config.request_timeout(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_strategy_section() {
        let config = GatewayConfig::from_json(
            r#"{
                "authStrategies": [
                    { "type": "basic", "users": { "alice": "pw" } },
                    { "type": "iam", "keys": { "AKID": "secret" }, "tokenTtlSecs": 60 },
                    { "type": "oauth2", "clients": { "sync": "s" } }
                ],
                "authBindings": { "local": "basic", "s3": "iam" }
            }"#,
        )
        .unwrap();

        let names: Vec<&str> = config.auth_strategies.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["basic", "iam", "oauth2"]);
        assert_eq!(config.auth_strategies[1].build().name(), "iam");

        let shown = format!("{:?}", config.auth_strategies[1]);
        assert!(shown.contains("AKID"));
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn test_bad_strategy_sections_rejected() {
        let twice = r#"{ "authStrategies": [
            { "type": "iam", "keys": {} }, { "type": "iam", "keys": {} }
        ] }"#;
        assert!(GatewayConfig::from_json(twice).unwrap_err().to_string().contains("declared twice"));
        assert!(
            GatewayConfig::from_json(
                r#"{ "authStrategies": [ { "type": "iam", "keys": {}, "tokenTtlSecs": 0 } ] }"#
            )
            .is_err()
        );
        assert!(
            GatewayConfig::from_json(r#"{ "authStrategies": [ { "type": "kerberos" } ] }"#).is_err()
        );
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = GatewayConfig::from_json("{}").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.acl.ttl, DEFAULT_ACL_TTL);
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let err = GatewayConfig::from_json(
            r#"{ "providers": [ { "id": "a", "type": "memory" }, { "id": "a", "type": "memory" } ] }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate provider id"));
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(GatewayConfig::from_json(r#"{ "authBindings": { "tape": "iam" } }"#).is_err());
        assert!(
            GatewayConfig::from_json(
                r#"{ "permissions": [ { "username": "a", "permission": "fly" } ] }"#
            )
            .is_err()
        );
        assert!(GatewayConfig::from_json(r#"{ "requestTimeoutMs": 0 }"#).is_err());
        assert!(GatewayConfig::from_json(r#"{ "cache": { "listingTtlSecs": -1 } }"#).is_err());
        assert!(GatewayConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.json");
        std::fs::write(&path, r#"{ "providers": [ { "id": "m", "type": "memory" } ] }"#).unwrap();
        assert_eq!(GatewayConfig::from_file(&path).unwrap().providers.len(), 1);

        let err = GatewayConfig::from_file(dir.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
