// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::strategy::{AuthStrategy, Credentials};
use crate::error::{Error, Result};
use crate::provider::ProviderType;

/// Named auth strategies plus the binding of provider types to them.
///
/// Strategies are looked up by name; provider types are bound to a
/// strategy name with [`set_strategy`](Self::set_strategy). Both tables can
/// change at runtime.
#[derive(Default)]
pub struct AuthStrategySelector {
    strategies: RwLock<HashMap<String, Arc<dyn AuthStrategy>>>,
    bindings: RwLock<HashMap<ProviderType, String>>,
}

impl AuthStrategySelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy under its [`AuthStrategy::name`], replacing any
    /// previous strategy of that name.
    pub fn register_strategy(&self, strategy: Arc<dyn AuthStrategy>) {
        let name = strategy.name().to_string();
        self.strategies.write().unwrap().insert(name, strategy);
    }

    /// Bind a provider type to a registered strategy.
    pub fn set_strategy(&self, provider_type: ProviderType, name: &str) -> Result<()> {
        if !self.strategies.read().unwrap().contains_key(name) {
            return Err(Error::UnknownStrategy(name.to_string()));
        }
        self.bindings
            .write()
            .unwrap()
            .insert(provider_type, name.to_string());
        Ok(())
    }

    /// Strategy by name.
    pub fn strategy(&self, name: &str) -> Result<Arc<dyn AuthStrategy>> {
        self.strategies
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownStrategy(name.to_string()))
    }

    /// Strategy bound to a provider type.
    pub fn strategy_for(&self, provider_type: ProviderType) -> Result<Arc<dyn AuthStrategy>> {
        let name = self
            .bindings
            .read()
            .unwrap()
            .get(&provider_type)
            .cloned()
            .ok_or_else(|| {
                Error::UnknownStrategy(format!("no strategy bound to provider type {}", provider_type))
            })?;
        self.strategy(&name)
    }

    /// Authenticate credentials with the strategy bound to `provider_type`.
    pub async fn authenticate(
        &self,
        provider_type: ProviderType,
        credentials: &Credentials,
    ) -> Result<bool> {
        let strategy = self.strategy_for(provider_type)?;
        strategy.authenticate(credentials).await
    }

    /// Registered strategy names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::{IamAuthStrategy, OAuth2Strategy};
    use crate::error::ErrorKind;

    fn selector() -> AuthStrategySelector {
        let selector = AuthStrategySelector::new();
        selector.register_strategy(Arc::new(IamAuthStrategy::new().key("AKID", "secret")));
        selector.register_strategy(Arc::new(OAuth2Strategy::new()));
        selector
    }

    #[test]
    fn test_lookup_by_name() {
        let s = selector();
        assert_eq!(s.strategy("iam").unwrap().name(), "iam");
        assert_eq!(s.names(), vec!["iam".to_string(), "oauth2".to_string()]);

        let err = s.strategy("kerberos").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnknownStrategy);
    }

    #[test]
    fn test_binding_requires_registered_strategy() {
        let s = selector();
        let err = s.set_strategy(ProviderType::S3, "kerberos").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownStrategy);
        assert!(s.strategy_for(ProviderType::S3).is_err());

        s.set_strategy(ProviderType::S3, "iam").unwrap();
        assert_eq!(s.strategy_for(ProviderType::S3).unwrap().name(), "iam");
    }

    #[tokio::test]
    async fn test_authenticate_through_binding() {
        let s = selector();
        s.set_strategy(ProviderType::S3, "iam").unwrap();
        let good = Credentials::AccessKey {
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
        };
        assert!(s.authenticate(ProviderType::S3, &good).await.unwrap());
        assert!(s.authenticate(ProviderType::Ftp, &good).await.is_err());
    }
}
