// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::permission::PermissionRecord;
use crate::error::Result;

/// Durable storage for permission grants.
///
/// Records are unique per `(username, permission)`. Adding an existing grant
/// returns the stored record unchanged.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn add(&self, username: &str, permission: &str) -> Result<PermissionRecord>;

    /// Returns whether a record was removed.
    async fn remove(&self, username: &str, permission: &str) -> Result<bool>;

    /// Returns the number of records removed.
    async fn remove_all(&self, username: &str) -> Result<usize>;

    async fn list_for_user(&self, username: &str) -> Result<Vec<PermissionRecord>>;

    async fn list_all(&self) -> Result<Vec<PermissionRecord>>;
}

/// Process-local permission store.
#[derive(Default)]
pub struct InMemoryPermissionStore {
    records: RwLock<BTreeMap<String, BTreeMap<String, PermissionRecord>>>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn add(&self, username: &str, permission: &str) -> Result<PermissionRecord> {
        let mut records = self.records.write().unwrap();
        let record = records
            .entry(username.to_string())
            .or_default()
            .entry(permission.to_string())
            .or_insert_with(|| PermissionRecord {
                username: username.to_string(),
                permission: permission.to_string(),
                granted_at: Utc::now(),
            });
        Ok(record.clone())
    }

    async fn remove(&self, username: &str, permission: &str) -> Result<bool> {
        let mut records = self.records.write().unwrap();
        let Some(user) = records.get_mut(username) else {
            return Ok(false);
        };
        let removed = user.remove(permission).is_some();
        if user.is_empty() {
            records.remove(username);
        }
        Ok(removed)
    }

    async fn remove_all(&self, username: &str) -> Result<usize> {
        let removed = self.records.write().unwrap().remove(username);
        Ok(removed.map_or(0, |user| user.len()))
    }

    async fn list_for_user(&self, username: &str) -> Result<Vec<PermissionRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .get(username)
            .map(|user| user.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_all(&self) -> Result<Vec<PermissionRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .values()
            .flat_map(|user| user.values().cloned())
            .collect())
    }
}
