//! fsgate - Unified file gateway over heterogeneous storage backends
//!
//! One file-operation contract (read, write, delete, list, stat, create
//! directory, move, copy) routed by provider id to local disk, memory, or any
//! backend plugged in through a [`ProviderFactory`]. Every request passes
//! the same checks before a byte reaches a backend:
//!
//! - the provider id resolves to an active provider ([`ProviderRegistry`])
//! - the caller holds a matching grant ([`AccessControl`])
//! - the path stays inside the provider root ([`PathSandbox`])
//!
//! Reads are served from a two-tier [`CacheLayer`] that mutations evict
//! before they report success.
//!
//! # Example
//!
//! ```rust
//! use fsgate::{Gateway, Operation, OperationRequest, ProviderDescriptor, ProviderType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = Gateway::builder()
//!         .provider(ProviderDescriptor::new("scratch", ProviderType::Memory))
//!         .permission("alice", "*")
//!         .build()
//!         .await?;
//!
//!     let write = OperationRequest::new(Operation::Write, "scratch", "notes/a.txt", "alice")
//!         .content("hello");
//!     assert!(gateway.execute(write).await.success);
//!
//!     let read = OperationRequest::new(Operation::Read, "scratch", "notes/a.txt", "alice");
//!     let response = gateway.execute(read).await;
//!     assert_eq!(response.content.as_deref(), Some("hello"));
//!     Ok(())
//! }
//! ```

mod acl;
mod auth;
mod cache;
mod config;
mod error;
mod logging_impl;
mod provider;
mod router;

pub use acl::{
    AccessControl, AclOperation, DEFAULT_ACL_TTL, InMemoryPermissionStore, Permission,
    PermissionRecord, PermissionStore, normalize_path,
};
pub use auth::{
    AuthStrategy, AuthStrategySelector, BasicAuthStrategy, BearerTokenStrategy, CredentialVerifier,
    Credentials, IamAuthStrategy, OAuth2Strategy, StaticCredentialVerifier, TokenIssuer,
};
pub use cache::{
    CacheConfig, CacheLayer, DistributedCache, FillTicket, InMemoryDistributedCache,
};
pub use config::{AclConfig, GatewayConfig, PermissionGrant, StrategyConfig};
pub use error::{Error, ErrorKind, RequestContext, Result};
pub use logging_impl::{LogConfig, sanitize_for_log};
pub use provider::{
    FileMetadata, LocalProvider, MemoryProvider, PathSandbox, ProviderConfig, ProviderDescriptor,
    ProviderFactory, ProviderRegistry, ProviderType, Quota, QuotaExceeded, StorageProvider,
    StorageUsage, default_case_sensitivity,
};
pub use router::{
    AuditEvent, AuditSink, ContentEncoding, InMemoryAuditSink, Operation, OperationRequest,
    OperationResponse, ProviderRouter, TracingAuditSink,
};

/// Re-exported so embedders can implement the async traits without a direct dependency.
pub use async_trait::async_trait;

use std::sync::Arc;
use std::time::Duration;

/// Gateway facade wiring registry, access control, cache and router.
///
/// Built once at process start and shared; there is no global state.
pub struct Gateway {
    registry: Arc<ProviderRegistry>,
    acl: Arc<AccessControl>,
    cache: Arc<CacheLayer>,
    auth: Arc<AuthStrategySelector>,
    router: ProviderRouter,
}

impl Gateway {
    /// Create a new GatewayBuilder.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Build a gateway from a configuration document.
    pub async fn from_config(config: GatewayConfig) -> Result<Self> {
        Self::builder().config(config).build().await
    }

    /// Run one request through the router.
    pub async fn execute(&self, request: OperationRequest) -> OperationResponse {
        self.router.execute(request).await
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn access_control(&self) -> &Arc<AccessControl> {
        &self.acl
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn auth(&self) -> &Arc<AuthStrategySelector> {
        &self.auth
    }

    /// Register a provider at runtime. Replaces any provider with the same id.
    pub async fn register_provider(&self, descriptor: ProviderDescriptor) -> Result<()> {
        let id = descriptor.id.clone();
        self.registry.register(descriptor).await?;
        self.cache.invalidate_provider(&id).await;
        Ok(())
    }

    /// Change a provider's configuration and drop its cached entries.
    ///
    /// The provider instance is rebuilt, so a memory provider loses its
    /// contents; see [`ProviderRegistry::update_configuration`].
    pub async fn update_provider(&self, id: &str, configuration: ProviderConfig) -> Result<()> {
        self.registry.update_configuration(id, configuration).await?;
        self.cache.invalidate_provider(id).await;
        Ok(())
    }

    /// Soft-delete a provider and drop its cached entries.
    pub async fn deactivate_provider(&self, id: &str) -> Result<()> {
        self.registry.deactivate(id)?;
        self.cache.invalidate_provider(id).await;
        Ok(())
    }

    /// Check every active provider.
    pub async fn test_connections(&self) -> Vec<(String, bool)> {
        self.registry.test_connections().await
    }
}

/// Builder for a [`Gateway`].
///
/// Settings from [`config`](Self::config) come first; later builder calls
/// add to or override them.
#[derive(Default)]
pub struct GatewayBuilder {
    config: GatewayConfig,
    permission_store: Option<Arc<dyn PermissionStore>>,
    distributed_cache: Option<Arc<dyn DistributedCache>>,
    audit: Option<Arc<dyn AuditSink>>,
    strategies: Vec<Arc<dyn AuthStrategy>>,
    factories: Vec<(ProviderType, Arc<dyn ProviderFactory>)>,
    log_config: Option<LogConfig>,
}

impl GatewayBuilder {
    /// Start from a configuration document.
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a provider.
    pub fn provider(mut self, descriptor: ProviderDescriptor) -> Self {
        self.config.providers.push(descriptor);
        self
    }

    /// Seed a permission grant.
    pub fn permission(mut self, username: impl Into<String>, permission: impl Into<String>) -> Self {
        self.config.permissions.push(PermissionGrant {
            username: username.into(),
            permission: permission.into(),
        });
        self
    }

    /// Use an external permission store. Defaults to an in-memory store.
    pub fn permission_store(mut self, store: Arc<dyn PermissionStore>) -> Self {
        self.permission_store = Some(store);
        self
    }

    /// Add a shared cache tier.
    pub fn distributed_cache(mut self, cache: Arc<dyn DistributedCache>) -> Self {
        self.distributed_cache = Some(cache);
        self
    }

    pub fn cache_config(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    /// Set the audit sink. Defaults to [`TracingAuditSink`].
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Register an auth strategy.
    pub fn auth_strategy(mut self, strategy: Arc<dyn AuthStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Bind a provider type to a strategy name.
    pub fn auth_binding(mut self, provider_type: ProviderType, strategy: impl Into<String>) -> Self {
        self.config
            .auth_bindings
            .insert(provider_type.to_string(), strategy.into());
        self
    }

    /// Install a factory for a backend type.
    pub fn provider_factory(mut self, provider_type: ProviderType, factory: Arc<dyn ProviderFactory>) -> Self {
        self.factories.push((provider_type, factory));
        self
    }

    /// Abort provider calls slower than `timeout`.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = Some(timeout.as_millis().max(1) as u64);
        self
    }

    /// Lifetime of cached per-user permissions.
    pub fn acl_ttl(mut self, ttl: Duration) -> Self {
        self.config.acl.ttl = ttl;
        self
    }

    pub fn log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = Some(log_config);
        self
    }

    /// Build the gateway.
    ///
    /// A provider that fails to register is logged and left out; the rest of
    /// the gateway still starts. Invalid configuration, unknown strategy
    /// bindings and permission store failures abort the build.
    pub async fn build(self) -> Result<Gateway> {
        let config = self.config;
        config.validate()?;

        let auth = Arc::new(AuthStrategySelector::new());
        // Builder strategies win over configured ones with the same name
        for strategy in &config.auth_strategies {
            auth.register_strategy(strategy.build());
        }
        for strategy in self.strategies {
            auth.register_strategy(strategy);
        }
        for (provider_type, strategy) in config.parsed_auth_bindings()? {
            auth.set_strategy(provider_type, &strategy)?;
        }

        let registry = Arc::new(
            ProviderRegistry::new()
                .with_auth(Arc::clone(&auth))
                .with_log_config(self.log_config.unwrap_or_default()),
        );
        for (provider_type, factory) in self.factories {
            registry.register_factory(provider_type, factory);
        }
        for descriptor in config.providers.iter().cloned() {
            let id = descriptor.id.clone();
            if let Err(e) = registry.register(descriptor).await {
                tracing::error!(provider_id = %id, error = %e, "provider failed to start");
            }
        }

        let store = self
            .permission_store
            .unwrap_or_else(|| Arc::new(InMemoryPermissionStore::new()));
        let acl = Arc::new(AccessControl::new(store).with_ttl(config.acl.ttl));
        for grant in &config.permissions {
            acl.add_permission(&grant.username, &grant.permission).await?;
        }
        acl.load_all().await?;

        let mut cache = CacheLayer::new(config.cache.clone());
        if let Some(distributed) = self.distributed_cache {
            cache = cache.with_distributed(distributed);
        }
        let cache = Arc::new(cache);

        let mut router = ProviderRouter::new(Arc::clone(&registry), Arc::clone(&acl), Arc::clone(&cache))
            .with_audit(self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)));
        if let Some(timeout) = config.request_timeout() {
            router = router.with_timeout(timeout);
        }

        tracing::info!(
            providers = registry.descriptors().len(),
            strategies = auth.names().len(),
            "gateway ready"
        );
        Ok(Gateway {
            registry,
            acl,
            cache,
            auth,
            router,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_roundtrip() {
        let gateway = Gateway::builder()
            .provider(ProviderDescriptor::new("m", ProviderType::Memory))
            .permission("alice", "*")
            .build()
            .await
            .unwrap();

        gateway
            .router()
            .write_file("alice", "m", "a.txt", b"hello")
            .await
            .unwrap();
        let response = gateway
            .execute(OperationRequest::new(Operation::Read, "m", "a.txt", "alice"))
            .await;
        assert!(response.success);
        assert_eq!(response.content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_bad_provider_does_not_block_startup() {
        let gateway = Gateway::builder()
            .provider(ProviderDescriptor::new("broken", ProviderType::Local))
            .provider(ProviderDescriptor::new("m", ProviderType::Memory))
            .build()
            .await
            .unwrap();
        assert!(gateway.registry().get("broken").is_err());
        assert!(gateway.registry().get("m").is_ok());
    }

    #[tokio::test]
    async fn test_unknown_binding_fails_build() {
        let result = Gateway::builder()
            .auth_binding(ProviderType::S3, "kerberos")
            .build()
            .await;
        assert_eq!(result.err().unwrap().kind(), ErrorKind::UnknownStrategy);
    }

    #[tokio::test]
    async fn test_documented_config_builds() {
        let root = tempfile::tempdir().unwrap();
        let json = r#"{
            "providers": [
                { "id": "docs", "type": "local", "configuration": { "basePath": "/srv/docs" } },
                { "id": "scratch", "type": "memory" }
            ],
            "cache": { "contentTtlSecs": 300, "listingTtlSecs": 30 },
            "acl": { "ttlSecs": 300 },
            "permissions": [ { "username": "alice", "permission": "read:reports" } ],
            "authStrategies": [
                { "type": "iam", "keys": { "AKIDEXAMPLE": "wJalrXUtnFEMI" }, "tokenTtlSecs": 900 }
            ],
            "authBindings": { "s3": "iam" },
            "requestTimeoutMs": 5000
        }"#
        .replace("/srv/docs", &root.path().display().to_string().replace('\\', "/"));

        let gateway = Gateway::from_config(GatewayConfig::from_json(&json).unwrap())
            .await
            .unwrap();
        assert_eq!(gateway.auth().names(), vec!["iam"]);
        assert_eq!(gateway.auth().strategy_for(ProviderType::S3).unwrap().name(), "iam");
        assert!(gateway.registry().get("docs").is_ok());

        let iam = gateway.auth().strategy("iam").unwrap();
        let token = iam
            .generate_token(&Credentials::AccessKey {
                access_key_id: "AKIDEXAMPLE".into(),
                secret_access_key: "wJalrXUtnFEMI".into(),
            })
            .await
            .unwrap();
        assert!(iam.validate_token(&token).await.unwrap());
    }

    #[tokio::test]
    async fn test_deactivate_provider() {
        let gateway = Gateway::builder()
            .provider(ProviderDescriptor::new("m", ProviderType::Memory))
            .permission("alice", "*")
            .build()
            .await
            .unwrap();
        gateway.deactivate_provider("m").await.unwrap();
        let response = gateway
            .execute(OperationRequest::new(Operation::List, "m", "", "alice"))
            .await;
        assert!(!response.success);
    }
}
