//! In-memory storage provider

// RwLock.read()/write().unwrap() only panics on lock poisoning (prior panic
// while holding lock). This is intentional - corrupted state should not propagate.
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::quota::{Quota, StorageUsage};
use super::sandbox::PathSandbox;
use super::traits::{FileMetadata, ProviderConfig, ProviderType, StorageProvider};
use crate::error::{Error, Result};

/// In-memory storage provider.
///
/// Stores files and directories in a map keyed by sandboxed path. Useful for
/// scratch space, tests, and as a reference implementation of the provider
/// contract.
///
/// Configuration keys (all optional): `basePath` (virtual root, default `/`),
/// `maxTotalBytes`, `maxFileSize`, `maxFileCount`.
pub struct MemoryProvider {
    state: RwLock<Option<MemoryState>>,
    store: RwLock<Store>,
}

#[derive(Clone)]
struct MemoryState {
    sandbox: PathSandbox,
    quota: Quota,
}

#[derive(Default)]
struct Store {
    entries: HashMap<PathBuf, Entry>,
    usage: StorageUsage,
}

#[derive(Debug, Clone)]
enum Entry {
    File {
        content: Vec<u8>,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    },
    Directory {
        created: DateTime<Utc>,
    },
}

impl Entry {
    fn directory() -> Self {
        Entry::Directory {
            created: Utc::now(),
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self, Entry::Directory { .. })
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// Create an uninitialized provider.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            store: RwLock::new(Store::default()),
        }
    }

    /// Create and initialize a provider rooted at `/` with the given quota.
    pub fn with_quota(quota: Quota) -> Self {
        let provider = Self::new();
        provider.install(MemoryState {
            sandbox: PathSandbox::namespace_root(),
            quota,
        });
        provider
    }

    fn install(&self, state: MemoryState) {
        let root = state.sandbox.root().to_path_buf();
        *self.state.write().unwrap() = Some(state);
        self.store
            .write()
            .unwrap()
            .entries
            .entry(root)
            .or_insert_with(Entry::directory);
    }

    fn state(&self) -> Result<MemoryState> {
        self.state
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Configuration("memory provider is not initialized".to_string()))
    }

    fn metadata(sandbox: &PathSandbox, path: &Path, entry: &Entry) -> FileMetadata {
        let relative = sandbox.relative(path).unwrap_or_default();
        match entry {
            Entry::File {
                content,
                created,
                modified,
            } => FileMetadata {
                path: relative,
                size: content.len() as u64,
                is_directory: false,
                modified: *modified,
                created: *created,
            },
            Entry::Directory { created } => FileMetadata {
                path: relative,
                size: 0,
                is_directory: true,
                modified: *created,
                created: *created,
            },
        }
    }

    /// Create missing ancestors of `path` (exclusive) as directories.
    fn ensure_parents(store: &mut Store, root: &Path, path: &Path, request: &str) -> Result<()> {
        let mut ancestors: Vec<&Path> = path
            .ancestors()
            .skip(1)
            .take_while(|p| p.starts_with(root))
            .collect();
        ancestors.reverse();

        for ancestor in ancestors {
            match store.entries.get(ancestor) {
                Some(entry) if entry.is_dir() => {}
                Some(_) => {
                    return Err(Error::AccessDenied(format!(
                        "{}: parent is not a directory",
                        request
                    )));
                }
                None => {
                    store
                        .entries
                        .insert(ancestor.to_path_buf(), Entry::directory());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Memory
    }

    async fn initialize(&self, config: &ProviderConfig) -> Result<()> {
        let base = config.get("basePath").map(String::as_str).unwrap_or("/");
        let sandbox = PathSandbox::virtual_root(base)?;
        let quota = Quota::from_config(config)?;
        self.install(MemoryState { sandbox, quota });
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let state = self.state()?;
        let resolved = state.sandbox.resolve(path)?;
        let store = self.store.read().unwrap();

        match store.entries.get(&resolved) {
            Some(Entry::File { content, .. }) => Ok(content.clone()),
            Some(Entry::Directory { .. }) => {
                Err(Error::NotFound(format!("{}: is a directory", path)))
            }
            None => Err(Error::NotFound(path.to_string())),
        }
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let state = self.state()?;
        state.quota.validate_path(Path::new(path))?;
        let resolved = state.sandbox.resolve(path)?;
        let mut store = self.store.write().unwrap();

        let (old_size, is_new, created) = match store.entries.get(&resolved) {
            Some(Entry::File {
                content, created, ..
            }) => (content.len() as u64, false, *created),
            Some(Entry::Directory { .. }) => {
                return Err(Error::AccessDenied(format!("{}: is a directory", path)));
            }
            None => (0, true, Utc::now()),
        };

        state
            .quota
            .check_write(&store.usage, old_size, content.len() as u64, is_new)?;
        Self::ensure_parents(&mut store, state.sandbox.root(), &resolved, path)?;

        store.entries.insert(
            resolved,
            Entry::File {
                content: content.to_vec(),
                created,
                modified: Utc::now(),
            },
        );
        store.usage.total_bytes = store.usage.total_bytes - old_size + content.len() as u64;
        if is_new {
            store.usage.file_count += 1;
        }
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let state = self.state()?;
        let resolved = state.sandbox.resolve(path)?;
        if resolved == state.sandbox.root() {
            return Err(Error::AccessDenied(
                "cannot delete provider root".to_string(),
            ));
        }

        let mut store = self.store.write().unwrap();
        let doomed: Vec<PathBuf> = store
            .entries
            .keys()
            .filter(|p| p.starts_with(&resolved))
            .cloned()
            .collect();

        for p in doomed {
            if let Some(Entry::File { content, .. }) = store.entries.remove(&p) {
                store.usage.total_bytes -= content.len() as u64;
                store.usage.file_count -= 1;
            }
        }
        Ok(())
    }

    async fn list_files(&self, path: &str, recursive: bool) -> Result<Vec<String>> {
        let state = self.state()?;
        let resolved = state.sandbox.resolve(path)?;
        let store = self.store.read().unwrap();

        if !matches!(store.entries.get(&resolved), Some(Entry::Directory { .. })) {
            return Ok(Vec::new());
        }

        let mut files: Vec<String> = store
            .entries
            .iter()
            .filter(|(p, entry)| {
                !entry.is_dir()
                    && if recursive {
                        p.starts_with(&resolved)
                    } else {
                        p.parent() == Some(resolved.as_path())
                    }
            })
            .filter_map(|(p, _)| state.sandbox.relative(p))
            .collect();
        files.sort();
        Ok(files)
    }

    async fn stat(&self, path: &str) -> Result<FileMetadata> {
        let state = self.state()?;
        let resolved = state.sandbox.resolve(path)?;
        let store = self.store.read().unwrap();

        store
            .entries
            .get(&resolved)
            .map(|entry| Self::metadata(&state.sandbox, &resolved, entry))
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let state = self.state()?;
        let resolved = state.sandbox.resolve(path)?;
        let store = self.store.read().unwrap();
        Ok(store.entries.contains_key(&resolved))
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        let state = self.state()?;
        state.quota.validate_path(Path::new(path))?;
        let resolved = state.sandbox.resolve(path)?;
        let mut store = self.store.write().unwrap();

        match store.entries.get(&resolved) {
            Some(Entry::Directory { .. }) => return Ok(()),
            Some(Entry::File { .. }) => {
                return Err(Error::AccessDenied(format!("{}: file exists", path)));
            }
            None => {}
        }

        Self::ensure_parents(&mut store, state.sandbox.root(), &resolved, path)?;
        store.entries.insert(resolved, Entry::directory());
        Ok(())
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        let state = self.state()?;
        state.quota.validate_path(Path::new(to))?;
        let source = state.sandbox.resolve(from)?;
        let target = state.sandbox.resolve(to)?;
        if source == target {
            let store = self.store.read().unwrap();
            if !store.entries.contains_key(&source) {
                return Err(Error::NotFound(from.to_string()));
            }
            return Ok(());
        }
        if source == state.sandbox.root() || target.starts_with(&source) {
            return Err(Error::AccessDenied(format!(
                "cannot move '{}' into '{}'",
                from, to
            )));
        }

        let mut store = self.store.write().unwrap();
        let source_is_dir = match store.entries.get(&source) {
            Some(entry) => entry.is_dir(),
            None => return Err(Error::NotFound(from.to_string())),
        };
        // Same rules as rename(2): a file never replaces a directory, and a
        // directory only replaces an empty one.
        match store.entries.get(&target) {
            Some(Entry::File { .. }) if source_is_dir => {
                return Err(Error::AccessDenied(format!("{}: file exists", to)));
            }
            Some(Entry::Directory { .. }) if !source_is_dir => {
                return Err(Error::AccessDenied(format!("{}: is a directory", to)));
            }
            Some(Entry::Directory { .. })
                if store
                    .entries
                    .keys()
                    .any(|p| p != &target && p.starts_with(&target)) =>
            {
                return Err(Error::AccessDenied(format!("{}: directory not empty", to)));
            }
            _ => {}
        }
        Self::ensure_parents(&mut store, state.sandbox.root(), &target, to)?;

        let moved: Vec<PathBuf> = store
            .entries
            .keys()
            .filter(|p| p.starts_with(&source))
            .cloned()
            .collect();
        for old in moved {
            if let Some(entry) = store.entries.remove(&old) {
                let suffix = old.strip_prefix(&source).unwrap_or(Path::new(""));
                let new_path = if suffix.as_os_str().is_empty() {
                    target.clone()
                } else {
                    target.join(suffix)
                };
                if let Some(Entry::File { content, .. }) = store.entries.insert(new_path, entry) {
                    // Overwrote an existing file at the destination
                    store.usage.total_bytes -= content.len() as u64;
                    store.usage.file_count -= 1;
                }
            }
        }
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        self.state.read().map(|s| s.is_some()).unwrap_or(false)
    }

    fn usage(&self) -> StorageUsage {
        self.store.read().unwrap().usage
    }
}
