//! Provider trait definitions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::quota::StorageUsage;
use crate::acl::normalize_path;
use crate::error::{Error, Result};

/// Backend-specific provider configuration.
pub type ProviderConfig = HashMap<String, String>;

/// Async storage provider trait.
///
/// One implementation per backend. Paths are always request-relative and
/// every path-accepting method resolves them through the provider's
/// [`PathSandbox`](super::PathSandbox) before touching the backend, so sandbox
/// violations surface as [`Error::AccessDenied`] regardless of backend.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Backend kind of this provider.
    fn provider_type(&self) -> ProviderType;

    /// Validate configuration and prepare the backend.
    ///
    /// Fails with [`Error::Configuration`] when a mandatory key is missing or
    /// the backend cannot be reached or created. Calling twice with the same
    /// configuration is safe.
    async fn initialize(&self, config: &ProviderConfig) -> Result<()>;

    /// Read a file's contents.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a file, creating intermediate directories and overwriting
    /// existing content.
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Delete a file or directory. Succeeds if nothing exists at `path`.
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// List files under a directory as root-relative `/`-separated paths.
    ///
    /// A missing directory yields an empty list, not an error.
    async fn list_files(&self, path: &str, recursive: bool) -> Result<Vec<String>>;

    /// Get metadata for a path.
    async fn stat(&self, path: &str) -> Result<FileMetadata>;

    /// Check if a path exists. Absence is `Ok(false)`.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Create a directory and any missing parents.
    async fn create_directory(&self, path: &str) -> Result<()>;

    /// Move a file.
    ///
    /// The default copies then deletes; backends with a native rename
    /// should override it.
    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        self.copy_file(from, to).await?;
        self.delete_file(from).await
    }

    /// Copy a file.
    async fn copy_file(&self, from: &str, to: &str) -> Result<()> {
        let content = self.read_file(from).await?;
        self.write_file(to, &content).await
    }

    /// Liveness check. Never fails; returns `false` on any problem.
    async fn test_connection(&self) -> bool;

    /// Key the cache stores `path` under.
    ///
    /// Two request paths naming the same backend object must map to the same
    /// key, or a write through one would leave the other cached. The default
    /// is the lexically normalized path, which suits backends without
    /// symlinks or case folding.
    async fn cache_key(&self, path: &str) -> Result<String> {
        normalize_path(path)
            .ok_or_else(|| Error::AccessDenied(format!("path '{}' escapes the provider root", path)))
    }

    /// Current storage usage, where the backend tracks it.
    fn usage(&self) -> StorageUsage {
        StorageUsage::default()
    }
}

/// File metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Root-relative path
    pub path: String,
    /// File size in bytes (0 for directories)
    pub size: u64,
    /// Whether the path is a directory
    pub is_directory: bool,
    /// Last modification time
    pub modified: DateTime<Utc>,
    /// Creation time
    pub created: DateTime<Utc>,
}

/// Storage backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Local,
    Memory,
    S3,
    Ftp,
    WebDav,
    Drive,
}

impl ProviderType {
    /// Backends that need live credentials before a connection is made.
    pub fn requires_credentials(&self) -> bool {
        matches!(
            self,
            ProviderType::S3 | ProviderType::Ftp | ProviderType::WebDav | ProviderType::Drive
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Local => "local",
            ProviderType::Memory => "memory",
            ProviderType::S3 => "s3",
            ProviderType::Ftp => "ftp",
            ProviderType::WebDav => "webdav",
            ProviderType::Drive => "drive",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(ProviderType::Local),
            "memory" => Ok(ProviderType::Memory),
            "s3" => Ok(ProviderType::S3),
            "ftp" | "ftps" => Ok(ProviderType::Ftp),
            "webdav" => Ok(ProviderType::WebDav),
            "drive" => Ok(ProviderType::Drive),
            other => Err(Error::Configuration(format!(
                "unknown provider type: {}",
                other
            ))),
        }
    }
}

/// Provider descriptor, as created by an admin operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    /// Unique provider id used to route requests
    pub id: String,
    /// Backend kind
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// Backend-specific configuration
    #[serde(default)]
    pub configuration: ProviderConfig,
    /// Inactive providers are kept for reference but never routed to
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl ProviderDescriptor {
    /// Create an active descriptor with empty configuration.
    pub fn new(id: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            id: id.into(),
            provider_type,
            configuration: ProviderConfig::new(),
            is_active: true,
        }
    }

    /// Add a configuration entry.
    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }
}
