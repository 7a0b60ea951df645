// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use super::permission::{AclOperation, Permission, PermissionRecord, normalize_path};
use super::store::PermissionStore;
use crate::error::{Error, ErrorKind, Result};

/// Default lifetime of a cached user entry: 5 minutes
pub const DEFAULT_ACL_TTL: Duration = Duration::from_secs(300);

struct CachedPermissions {
    permissions: Vec<Permission>,
    loaded_at: Instant,
}

/// Per-user permission evaluation over a [`PermissionStore`].
///
/// Grants are cached per user for a TTL. Changes made through this evaluator
/// evict the user's entry before returning, so a revoked grant is never
/// honored by a later `has_access` on the same instance. Other instances
/// observe the change within the TTL.
///
/// Everything not explicitly granted is denied.
///
/// # Example
///
/// ```rust
/// use fsgate::{AccessControl, AclOperation, InMemoryPermissionStore};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let acl = AccessControl::new(Arc::new(InMemoryPermissionStore::new()));
/// acl.add_permission("alice", "read:reports").await.unwrap();
///
/// assert!(acl.has_access("alice", "reports/q1.csv", AclOperation::Read).await.unwrap());
/// assert!(!acl.has_access("alice", "reports2/x", AclOperation::Read).await.unwrap());
/// assert!(!acl.has_access("alice", "reports/q1.csv", AclOperation::Write).await.unwrap());
/// # });
/// ```
pub struct AccessControl {
    store: Arc<dyn PermissionStore>,
    index: RwLock<HashMap<String, CachedPermissions>>,
    ttl: Duration,
    /// Bumped on every eviction; loads that raced one are not cached
    generation: AtomicU64,
}

impl AccessControl {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self {
            store,
            index: RwLock::new(HashMap::new()),
            ttl: DEFAULT_ACL_TTL,
            generation: AtomicU64::new(0),
        }
    }

    /// Set the per-user cache lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Rebuild the whole index from the store.
    pub async fn load_all(&self) -> Result<()> {
        let generation = self.generation.load(Ordering::Acquire);
        let records = self.store.list_all().await.map_err(store_error)?;

        let mut grouped: HashMap<String, Vec<Permission>> = HashMap::new();
        for record in &records {
            match Permission::parse(&record.permission) {
                Ok(permission) => grouped
                    .entry(record.username.clone())
                    .or_default()
                    .push(permission),
                Err(e) => tracing::warn!(
                    username = %record.username,
                    permission = %record.permission,
                    error = %e,
                    "skipping invalid permission"
                ),
            }
        }

        let loaded_at = Instant::now();
        let mut index = self.index.write().unwrap();
        if self.generation.load(Ordering::Acquire) != generation {
            // A grant changed while loading; drop the snapshot and let
            // users reload lazily.
            index.clear();
            return Ok(());
        }
        *index = grouped
            .into_iter()
            .map(|(user, permissions)| {
                (
                    user,
                    CachedPermissions {
                        permissions,
                        loaded_at,
                    },
                )
            })
            .collect();
        tracing::info!(users = index.len(), "permission index loaded");
        Ok(())
    }

    /// Drop every cached entry and reload from the store.
    pub async fn invalidate_all(&self) -> Result<()> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.index.write().unwrap().clear();
        self.load_all().await
    }

    /// Whether `username` may perform `operation` on `path`.
    ///
    /// Returns `Ok(false)` for unknown users and for paths that climb above
    /// the provider root. Store failures surface as
    /// [`Error::ProviderUnavailable`].
    pub async fn has_access(
        &self,
        username: &str,
        path: &str,
        operation: AclOperation,
    ) -> Result<bool> {
        if username.is_empty() {
            return Ok(false);
        }
        let Some(normalized) = normalize_path(path) else {
            return Ok(false);
        };

        if let Some(allowed) = self.evaluate_cached(username, &normalized, operation) {
            return Ok(allowed);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let records = self
            .store
            .list_for_user(username)
            .await
            .map_err(store_error)?;
        let permissions: Vec<Permission> = records
            .iter()
            .filter_map(|r| Permission::parse(&r.permission).ok())
            .collect();
        let allowed = permissions
            .iter()
            .any(|p| p.allows(operation, &normalized));

        let mut index = self.index.write().unwrap();
        if self.generation.load(Ordering::Acquire) == generation {
            index.insert(
                username.to_string(),
                CachedPermissions {
                    permissions,
                    loaded_at: Instant::now(),
                },
            );
        }
        Ok(allowed)
    }

    fn evaluate_cached(&self, username: &str, path: &str, operation: AclOperation) -> Option<bool> {
        let index = self.index.read().unwrap();
        let entry = index.get(username)?;
        if entry.loaded_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.permissions.iter().any(|p| p.allows(operation, path)))
    }

    /// Grant a permission. The string is validated and stored in its
    /// canonical form, so equivalent spellings share one record.
    pub async fn add_permission(&self, username: &str, permission: &str) -> Result<PermissionRecord> {
        let canonical = Permission::parse(permission)?.to_string();
        let record = self
            .store
            .add(username, &canonical)
            .await
            .map_err(store_error)?;
        self.evict(username);
        tracing::info!(username = %username, permission = %canonical, "permission granted");
        Ok(record)
    }

    /// Revoke a permission under any equivalent spelling. Returns whether it
    /// existed.
    ///
    /// Records written to the store directly may not be canonical, so the
    /// string as given is removed too.
    pub async fn remove_permission(&self, username: &str, permission: &str) -> Result<bool> {
        let mut removed = false;
        if let Ok(parsed) = Permission::parse(permission) {
            let canonical = parsed.to_string();
            if canonical != permission {
                removed |= self
                    .store
                    .remove(username, &canonical)
                    .await
                    .map_err(store_error)?;
            }
        }
        removed |= self
            .store
            .remove(username, permission)
            .await
            .map_err(store_error)?;
        self.evict(username);
        tracing::info!(username = %username, permission = %permission, removed, "permission revoked");
        Ok(removed)
    }

    /// Revoke every permission of a user. Returns how many were removed.
    pub async fn remove_all_permissions(&self, username: &str) -> Result<usize> {
        let removed = self.store.remove_all(username).await.map_err(store_error)?;
        self.evict(username);
        tracing::info!(username = %username, removed, "all permissions revoked");
        Ok(removed)
    }

    /// Stored grants for a user.
    pub async fn permissions_for(&self, username: &str) -> Result<Vec<PermissionRecord>> {
        self.store.list_for_user(username).await.map_err(store_error)
    }

    fn evict(&self, username: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.index.write().unwrap().remove(username);
    }
}

fn store_error(err: Error) -> Error {
    match err.kind() {
        ErrorKind::ProviderUnavailable => err,
        _ => Error::ProviderUnavailable(format!("permission store: {}", err)),
    }
}
