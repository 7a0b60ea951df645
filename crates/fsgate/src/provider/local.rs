//! Local disk storage provider

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::sync::Mutex;

use super::quota::{Quota, StorageUsage};
use super::sandbox::PathSandbox;
use super::traits::{FileMetadata, ProviderConfig, ProviderType, StorageProvider};
use crate::error::{Error, Result};

/// Storage provider over a directory on local disk.
///
/// Configuration keys:
///
/// | Key | Required | Meaning |
/// |-----|----------|---------|
/// | `basePath` | yes | Provider root; created if missing |
/// | `caseSensitive` | no | `true`/`false`; defaults to the platform convention |
/// | `maxFileSize` | no | Largest accepted write in bytes |
/// | `maxTotalBytes` | no | Bytes all files under the root may hold |
/// | `maxFileCount` | no | Files the root may hold |
///
/// The sandbox follows symlinks when resolving paths, so a link inside the
/// root that points elsewhere is treated as outside the root.
///
/// With `maxTotalBytes` or `maxFileCount` set, every write walks the root to
/// measure usage, and writes through this provider are serialized. Files
/// changed behind the provider's back are counted as found.
pub struct LocalProvider {
    state: RwLock<Option<LocalState>>,
    /// Held from usage check to write when usage limits apply
    quota_lock: Mutex<()>,
}

#[derive(Clone)]
struct LocalState {
    sandbox: PathSandbox,
    quota: Quota,
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalProvider {
    /// Create an uninitialized provider.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            quota_lock: Mutex::new(()),
        }
    }

    fn state(&self) -> Result<LocalState> {
        self.state
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Configuration("local provider is not initialized".to_string()))
    }

    async fn metadata(resolved: &Path, request: &str) -> Result<std::fs::Metadata> {
        tokio::fs::metadata(resolved)
            .await
            .map_err(|e| Error::from_io(e, request))
    }

    async fn create_parents(resolved: &Path, request: &str) -> Result<()> {
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::from_io(e, request))?;
        }
        Ok(())
    }

    /// Bytes and regular files under the root. Symlinks are not followed.
    async fn disk_usage(root: &Path) -> Result<StorageUsage> {
        let mut usage = StorageUsage::default();
        let mut pending = vec![root.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => return Err(Error::from_io(e, "usage")),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::from_io(e, "usage"))?
            {
                let Ok(meta) = tokio::fs::symlink_metadata(entry.path()).await else {
                    continue;
                };
                if meta.is_dir() {
                    pending.push(entry.path());
                } else if meta.is_file() {
                    usage.total_bytes += meta.len();
                    usage.file_count += 1;
                }
            }
        }
        Ok(usage)
    }

    /// Check a write of `new_size` bytes to `resolved` against the usage
    /// limits. Callers hold `quota_lock`.
    async fn check_usage(state: &LocalState, resolved: &Path, new_size: u64) -> Result<()> {
        let usage = Self::disk_usage(state.sandbox.root()).await?;
        let (old_size, is_new) = match tokio::fs::symlink_metadata(resolved).await {
            Ok(meta) if meta.is_file() => (meta.len(), false),
            _ => (0, true),
        };
        state.quota.check_write(&usage, old_size, new_size, is_new)?;
        Ok(())
    }

    async fn collect_files(
        sandbox: &PathSandbox,
        dir: PathBuf,
        recursive: bool,
        request: &str,
    ) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut pending = vec![dir];

        while let Some(current) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                // Removed while walking
                Err(e) if e.kind() == IoErrorKind::NotFound => continue,
                Err(e) => return Err(Error::from_io(e, request)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::from_io(e, request))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Error::from_io(e, request))?;
                // Symlinks are not followed during listing
                if file_type.is_dir() {
                    if recursive {
                        pending.push(entry.path());
                    }
                } else if file_type.is_file() {
                    if let Some(relative) = sandbox.relative(&entry.path()) {
                        files.push(relative);
                    }
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

fn to_utc(time: std::io::Result<std::time::SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(DateTime::<Utc>::from)
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Local
    }

    async fn initialize(&self, config: &ProviderConfig) -> Result<()> {
        let base = config
            .get("basePath")
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::Configuration("basePath is required".to_string()))?;

        tokio::fs::create_dir_all(base)
            .await
            .map_err(|e| Error::Configuration(format!("cannot create provider root: {}", e)))?;

        let mut sandbox = PathSandbox::on_disk(base)?;
        if let Some(raw) = config.get("caseSensitive") {
            let case_sensitive = raw.trim().parse::<bool>().map_err(|_| {
                Error::Configuration("caseSensitive must be true or false".to_string())
            })?;
            sandbox = sandbox.case_sensitive(case_sensitive);
        }
        let quota = Quota::from_config(config)?;

        *self.state.write().unwrap() = Some(LocalState { sandbox, quota });
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let state = self.state()?;
        let resolved = state.sandbox.resolve_on_disk(path).await?;
        if Self::metadata(&resolved, path).await?.is_dir() {
            return Err(Error::NotFound(format!("{}: is a directory", path)));
        }
        tokio::fs::read(&resolved)
            .await
            .map_err(|e| Error::from_io(e, path))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let state = self.state()?;
        state.quota.validate_path(Path::new(path))?;
        state.quota.check_file_size(content.len() as u64)?;

        let resolved = state.sandbox.resolve_on_disk(path).await?;
        let _guard = if state.quota.limits_usage() {
            let guard = self.quota_lock.lock().await;
            Self::check_usage(&state, &resolved, content.len() as u64).await?;
            Some(guard)
        } else {
            None
        };
        Self::create_parents(&resolved, path).await?;
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| Error::from_io(e, path))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let state = self.state()?;
        let resolved = state.sandbox.resolve_on_disk(path).await?;
        if resolved == state.sandbox.root() {
            return Err(Error::AccessDenied(
                "cannot delete provider root".to_string(),
            ));
        }

        let meta = match tokio::fs::symlink_metadata(&resolved).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::from_io(e, path)),
        };

        let removed = if meta.is_dir() {
            tokio::fs::remove_dir_all(&resolved).await
        } else {
            tokio::fs::remove_file(&resolved).await
        };
        match removed {
            Ok(()) => Ok(()),
            // Lost a race with another delete; same outcome
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from_io(e, path)),
        }
    }

    async fn list_files(&self, path: &str, recursive: bool) -> Result<Vec<String>> {
        let state = self.state()?;
        let resolved = state.sandbox.resolve_on_disk(path).await?;
        match tokio::fs::metadata(&resolved).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(Vec::new()),
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::from_io(e, path)),
        }
        Self::collect_files(&state.sandbox, resolved, recursive, path).await
    }

    async fn stat(&self, path: &str) -> Result<FileMetadata> {
        let state = self.state()?;
        let resolved = state.sandbox.resolve_on_disk(path).await?;
        let meta = Self::metadata(&resolved, path).await?;

        let modified = to_utc(meta.modified()).unwrap_or_else(Utc::now);
        Ok(FileMetadata {
            path: state.sandbox.relative(&resolved).unwrap_or_default(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            is_directory: meta.is_dir(),
            modified,
            // Not every filesystem records birth time
            created: to_utc(meta.created()).unwrap_or(modified),
        })
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let state = self.state()?;
        let resolved = state.sandbox.resolve_on_disk(path).await?;
        tokio::fs::try_exists(&resolved)
            .await
            .map_err(|e| Error::from_io(e, path))
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        let state = self.state()?;
        state.quota.validate_path(Path::new(path))?;
        let resolved = state.sandbox.resolve_on_disk(path).await?;
        tokio::fs::create_dir_all(&resolved)
            .await
            .map_err(|e| Error::from_io(e, path))
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let state = self.state()?;
        state.quota.validate_path(Path::new(to))?;
        let source = state.sandbox.resolve_on_disk(from).await?;
        let target = state.sandbox.resolve_on_disk(to).await?;
        if source == state.sandbox.root() {
            return Err(Error::AccessDenied("cannot move provider root".to_string()));
        }

        Self::metadata(&source, from).await?;
        Self::create_parents(&target, to).await?;
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| Error::from_io(e, from))
    }

    async fn copy_file(&self, from: &str, to: &str) -> Result<()> {
        let state = self.state()?;
        state.quota.validate_path(Path::new(to))?;
        let source = state.sandbox.resolve_on_disk(from).await?;
        let target = state.sandbox.resolve_on_disk(to).await?;

        let meta = Self::metadata(&source, from).await?;
        if meta.is_dir() {
            return Err(Error::AccessDenied(format!(
                "{}: cannot copy a directory",
                from
            )));
        }
        state.quota.check_file_size(meta.len())?;
        let _guard = if state.quota.limits_usage() {
            let guard = self.quota_lock.lock().await;
            Self::check_usage(&state, &target, meta.len()).await?;
            Some(guard)
        } else {
            None
        };

        Self::create_parents(&target, to).await?;
        tokio::fs::copy(&source, &target)
            .await
            .map(|_| ())
            .map_err(|e| Error::from_io(e, to))
    }

    /// Symlinks are followed, and case is folded when the sandbox is
    /// case-insensitive, so every alias of a file shares its cache entries.
    async fn cache_key(&self, path: &str) -> Result<String> {
        let state = self.state()?;
        let resolved = state.sandbox.resolve_on_disk(path).await?;
        let relative = state.sandbox.relative(&resolved).ok_or_else(|| {
            Error::AccessDenied(format!("path '{}' escapes the provider root", path))
        })?;
        if state.sandbox.is_case_sensitive() {
            Ok(relative)
        } else {
            Ok(relative.to_lowercase())
        }
    }

    async fn test_connection(&self) -> bool {
        let Ok(state) = self.state() else {
            return false;
        };
        tokio::fs::metadata(state.sandbox.root())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}
