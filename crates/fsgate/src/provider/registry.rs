//! Provider registry.
//!
//! [`ProviderRegistry`] maps provider ids to live [`StorageProvider`]
//! instances, the way a mount table maps paths to filesystems. Instances are
//! built by a [`ProviderFactory`] chosen by [`ProviderType`] and initialized
//! once, at registration or configuration change.

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::local::LocalProvider;
use super::memory::MemoryProvider;
use super::traits::{ProviderConfig, ProviderDescriptor, ProviderType, StorageProvider};
use crate::auth::{AuthStrategySelector, Credentials};
use crate::error::{Error, Result};
use crate::logging_impl::LogConfig;

/// Builds uninitialized provider instances for one backend type.
///
/// Network backends (S3, FTP, WebDAV, Drive) are supplied by embedders
/// through [`ProviderRegistry::register_factory`].
pub trait ProviderFactory: Send + Sync {
    fn create(&self, descriptor: &ProviderDescriptor) -> Result<Arc<dyn StorageProvider>>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&ProviderDescriptor) -> Result<Arc<dyn StorageProvider>> + Send + Sync,
{
    fn create(&self, descriptor: &ProviderDescriptor) -> Result<Arc<dyn StorageProvider>> {
        self(descriptor)
    }
}

struct LocalFactory;

impl ProviderFactory for LocalFactory {
    fn create(&self, _descriptor: &ProviderDescriptor) -> Result<Arc<dyn StorageProvider>> {
        Ok(Arc::new(LocalProvider::new()))
    }
}

struct MemoryFactory;

impl ProviderFactory for MemoryFactory {
    fn create(&self, _descriptor: &ProviderDescriptor) -> Result<Arc<dyn StorageProvider>> {
        Ok(Arc::new(MemoryProvider::new()))
    }
}

#[derive(Clone)]
struct RegisteredProvider {
    descriptor: ProviderDescriptor,
    provider: Arc<dyn StorageProvider>,
}

/// Registry of provider instances keyed by id.
///
/// # Lifecycle
///
/// - [`register`](Self::register) builds, authenticates and initializes an
///   instance, replacing any previous registration of the same id.
/// - [`update_configuration`](Self::update_configuration) builds the new
///   instance before swapping it in; requests in flight keep the old one.
/// - [`deactivate`](Self::deactivate) is a soft delete: the descriptor stays,
///   routing to it fails with [`Error::ProviderNotFound`].
///
/// # Example
///
/// ```rust
/// use fsgate::{ProviderDescriptor, ProviderRegistry, ProviderType};
///
/// # #[tokio::main]
/// # async fn main() -> fsgate::Result<()> {
/// let registry = ProviderRegistry::new();
/// registry
///     .register(ProviderDescriptor::new("scratch", ProviderType::Memory))
///     .await?;
///
/// let provider = registry.get("scratch")?;
/// provider.write_file("notes/a.txt", b"hello").await?;
/// assert_eq!(provider.read_file("notes/a.txt").await?, b"hello");
///
/// registry.deactivate("scratch")?;
/// assert!(registry.get("scratch").is_err());
/// # Ok(())
/// # }
/// ```
pub struct ProviderRegistry {
    providers: RwLock<BTreeMap<String, RegisteredProvider>>,
    factories: RwLock<HashMap<ProviderType, Arc<dyn ProviderFactory>>>,
    auth: Option<Arc<AuthStrategySelector>>,
    log_config: LogConfig,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Registry with the built-in local and memory factories.
    pub fn new() -> Self {
        let mut factories: HashMap<ProviderType, Arc<dyn ProviderFactory>> = HashMap::new();
        factories.insert(ProviderType::Local, Arc::new(LocalFactory));
        factories.insert(ProviderType::Memory, Arc::new(MemoryFactory));
        Self {
            providers: RwLock::new(BTreeMap::new()),
            factories: RwLock::new(factories),
            auth: None,
            log_config: LogConfig::default(),
        }
    }

    /// Authenticate credentialed backends through `selector` before use.
    pub fn with_auth(mut self, selector: Arc<AuthStrategySelector>) -> Self {
        self.auth = Some(selector);
        self
    }

    /// Set redaction rules for logged configuration.
    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// Install or replace the factory for a backend type.
    pub fn register_factory(&self, provider_type: ProviderType, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .write()
            .unwrap()
            .insert(provider_type, factory);
    }

    /// Build and register a provider from its descriptor.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] for an empty id, a type with no factory,
    ///   missing or rejected backend credentials, or invalid configuration
    /// - [`Error::UnknownStrategy`] when no auth strategy is bound to a
    ///   credentialed backend type
    pub async fn register(&self, descriptor: ProviderDescriptor) -> Result<()> {
        if descriptor.id.trim().is_empty() {
            return Err(Error::Configuration("provider id is empty".to_string()));
        }
        let provider = self.build(&descriptor).await?;
        tracing::info!(
            provider_id = %descriptor.id,
            provider_type = %descriptor.provider_type,
            active = descriptor.is_active,
            config = ?self.log_config.redact_config(&descriptor.configuration),
            "provider registered"
        );
        self.providers.write().unwrap().insert(
            descriptor.id.clone(),
            RegisteredProvider {
                descriptor,
                provider,
            },
        );
        Ok(())
    }

    /// Register an already initialized instance.
    pub fn insert_provider(&self, descriptor: ProviderDescriptor, provider: Arc<dyn StorageProvider>) {
        tracing::info!(
            provider_id = %descriptor.id,
            provider_type = %descriptor.provider_type,
            "provider instance registered"
        );
        self.providers.write().unwrap().insert(
            descriptor.id.clone(),
            RegisteredProvider {
                descriptor,
                provider,
            },
        );
    }

    /// Replace a provider's configuration and rebuild its instance.
    ///
    /// The old instance keeps serving until the new one is initialized. On
    /// failure the old registration is left untouched.
    ///
    /// Nothing is carried from the old instance to the new one. Backends that
    /// persist elsewhere (disk, object stores) see their data again through
    /// the new instance; a [`MemoryProvider`](super::MemoryProvider) starts
    /// empty. Copy data out first if it must survive.
    pub async fn update_configuration(&self, id: &str, configuration: ProviderConfig) -> Result<()> {
        let mut descriptor = self.descriptor(id)?;
        descriptor.configuration = configuration;
        let provider = self.build(&descriptor).await?;

        tracing::info!(
            provider_id = %id,
            config = ?self.log_config.redact_config(&descriptor.configuration),
            "provider configuration updated"
        );
        let mut providers = self.providers.write().unwrap();
        // Keep a concurrent deactivation
        if let Some(existing) = providers.get(id) {
            descriptor.is_active = existing.descriptor.is_active;
        }
        providers.insert(
            id.to_string(),
            RegisteredProvider {
                descriptor,
                provider,
            },
        );
        Ok(())
    }

    /// Soft-delete a provider.
    pub fn deactivate(&self, id: &str) -> Result<()> {
        self.set_active(id, false)
    }

    /// Re-enable a deactivated provider.
    pub fn activate(&self, id: &str) -> Result<()> {
        self.set_active(id, true)
    }

    fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let mut providers = self.providers.write().unwrap();
        let entry = providers
            .get_mut(id)
            .ok_or_else(|| Error::ProviderNotFound(id.to_string()))?;
        entry.descriptor.is_active = active;
        tracing::info!(provider_id = %id, active, "provider activation changed");
        Ok(())
    }

    /// Active provider instance for `id`.
    pub fn get(&self, id: &str) -> Result<Arc<dyn StorageProvider>> {
        let providers = self.providers.read().unwrap();
        match providers.get(id) {
            Some(entry) if entry.descriptor.is_active => Ok(entry.provider.clone()),
            _ => Err(Error::ProviderNotFound(id.to_string())),
        }
    }

    /// Descriptor for `id`, active or not.
    pub fn descriptor(&self, id: &str) -> Result<ProviderDescriptor> {
        self.providers
            .read()
            .unwrap()
            .get(id)
            .map(|entry| entry.descriptor.clone())
            .ok_or_else(|| Error::ProviderNotFound(id.to_string()))
    }

    /// All descriptors, ordered by id.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.providers
            .read()
            .unwrap()
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    /// Check every active provider. Results are ordered by id.
    pub async fn test_connections(&self) -> Vec<(String, bool)> {
        let active: Vec<(String, Arc<dyn StorageProvider>)> = self
            .providers
            .read()
            .unwrap()
            .iter()
            .filter(|(_, entry)| entry.descriptor.is_active)
            .map(|(id, entry)| (id.clone(), entry.provider.clone()))
            .collect();

        let mut results = Vec::with_capacity(active.len());
        for (id, provider) in active {
            let ok = provider.test_connection().await;
            if !ok {
                tracing::warn!(provider_id = %id, "provider connection test failed");
            }
            results.push((id, ok));
        }
        results
    }

    async fn build(&self, descriptor: &ProviderDescriptor) -> Result<Arc<dyn StorageProvider>> {
        if descriptor.provider_type.requires_credentials() {
            self.authenticate_backend(descriptor).await?;
        }

        let factory = self
            .factories
            .read()
            .unwrap()
            .get(&descriptor.provider_type)
            .cloned()
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "no factory registered for provider type {}",
                    descriptor.provider_type
                ))
            })?;
        let provider = factory.create(descriptor)?;
        provider.initialize(&descriptor.configuration).await?;
        Ok(provider)
    }

    async fn authenticate_backend(&self, descriptor: &ProviderDescriptor) -> Result<()> {
        let selector = self.auth.as_ref().ok_or_else(|| {
            Error::Configuration(format!(
                "provider '{}' needs credentials but no auth strategies are configured",
                descriptor.id
            ))
        })?;
        let strategy = selector.strategy_for(descriptor.provider_type)?;
        let credentials = Credentials::from_config(&descriptor.configuration)?;
        if !strategy.authenticate(&credentials).await? {
            tracing::warn!(
                provider_id = %descriptor.id,
                strategy = strategy.name(),
                "backend credentials rejected"
            );
            return Err(Error::Configuration(format!(
                "credentials rejected for provider '{}'",
                descriptor.id
            )));
        }
        Ok(())
    }
}
