use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, TimeDelta, Utc};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::CacheConfig;
use super::distributed::DistributedCache;
use crate::acl::normalize_path;
use crate::provider::FileMetadata;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    provider_id: String,
    path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListingKey {
    provider_id: String,
    path: String,
    recursive: bool,
}

#[derive(Clone)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

/// Distributed-tier document.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

/// File content, base64 in JSON.
struct Blob(Vec<u8>);

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Blob)
            .map_err(serde::de::Error::custom)
    }
}

/// Cache epoch observed before a provider read.
///
/// A fill is dropped if any invalidation happened after the ticket was
/// taken, so a slow read cannot reinsert data a concurrent write replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillTicket(u64);

/// Content, metadata and listing cache keyed by provider id and path.
///
/// Paths are normalized before use as keys, so `a/./b` and `a/b` share an
/// entry. Paths that climb above the root are never cached.
pub struct CacheLayer {
    config: CacheConfig,
    content: Cache<CacheKey, CacheEntry<Arc<Vec<u8>>>>,
    metadata: Cache<CacheKey, CacheEntry<FileMetadata>>,
    listings: Cache<ListingKey, CacheEntry<Arc<Vec<String>>>>,
    distributed: Option<Arc<dyn DistributedCache>>,
    epoch: AtomicU64,
}

impl CacheLayer {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            content: build_cache(&config, config.content_ttl),
            metadata: build_cache(&config, config.metadata_ttl),
            listings: build_cache(&config, config.listing_ttl),
            config,
            distributed: None,
            epoch: AtomicU64::new(0),
        }
    }

    /// Add a shared tier consulted on local misses.
    pub fn with_distributed(mut self, distributed: Arc<dyn DistributedCache>) -> Self {
        self.distributed = Some(distributed);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Take before reading from a provider; pass to the matching `put_*`.
    pub fn fill_ticket(&self) -> FillTicket {
        FillTicket(self.epoch.load(Ordering::Acquire))
    }

    pub async fn get_content(&self, provider_id: &str, path: &str) -> Option<Vec<u8>> {
        let key = self.key(provider_id, path)?;
        if let Some(hit) = local_get(&self.content, &key) {
            tracing::debug!(provider_id, path = %key.path, "content cache hit");
            return Some(hit.to_vec());
        }

        let ticket = self.fill_ticket();
        let (Blob(bytes), remaining) = self.remote_get::<Blob>(&content_key(&key)).await?;
        let bytes = Arc::new(bytes);
        if self.is_current(ticket) {
            let ttl = remaining.min(self.config.content_ttl);
            self.content.insert(key, entry(bytes.clone(), ttl));
        }
        tracing::debug!(provider_id, "content served from distributed cache");
        Some(bytes.to_vec())
    }

    pub async fn put_content(&self, ticket: FillTicket, provider_id: &str, path: &str, content: &[u8]) {
        if content.len() as u64 > self.config.max_content_bytes {
            return;
        }
        let Some(key) = self.fillable(ticket, provider_id, path) else {
            return;
        };
        let ttl = self.config.content_ttl;
        if self
            .remote_fill(ticket, &content_key(&key), &Blob(content.to_vec()), ttl)
            .await
        {
            self.content.insert(key, entry(Arc::new(content.to_vec()), ttl));
        }
    }

    pub async fn get_metadata(&self, provider_id: &str, path: &str) -> Option<FileMetadata> {
        let key = self.key(provider_id, path)?;
        if let Some(hit) = local_get(&self.metadata, &key) {
            tracing::debug!(provider_id, path = %key.path, "metadata cache hit");
            return Some(hit);
        }

        let ticket = self.fill_ticket();
        let (metadata, remaining) = self
            .remote_get::<FileMetadata>(&metadata_key(&key))
            .await?;
        if self.is_current(ticket) {
            let ttl = remaining.min(self.config.metadata_ttl);
            self.metadata.insert(key, entry(metadata.clone(), ttl));
        }
        Some(metadata)
    }

    pub async fn put_metadata(&self, ticket: FillTicket, provider_id: &str, path: &str, metadata: &FileMetadata) {
        let Some(key) = self.fillable(ticket, provider_id, path) else {
            return;
        };
        let ttl = self.config.metadata_ttl;
        if self
            .remote_fill(ticket, &metadata_key(&key), metadata, ttl)
            .await
        {
            self.metadata.insert(key, entry(metadata.clone(), ttl));
        }
    }

    pub async fn get_listing(&self, provider_id: &str, path: &str, recursive: bool) -> Option<Vec<String>> {
        let key = self.listing_key(provider_id, path, recursive)?;
        if let Some(hit) = local_get(&self.listings, &key) {
            tracing::debug!(provider_id, path = %key.path, recursive, "listing cache hit");
            return Some(hit.to_vec());
        }

        let ticket = self.fill_ticket();
        let (files, remaining) = self
            .remote_get::<Vec<String>>(&listing_remote_key(&key))
            .await?;
        let files = Arc::new(files);
        if self.is_current(ticket) {
            let ttl = remaining.min(self.config.listing_ttl);
            self.listings.insert(key, entry(files.clone(), ttl));
        }
        Some(files.to_vec())
    }

    pub async fn put_listing(
        &self,
        ticket: FillTicket,
        provider_id: &str,
        path: &str,
        recursive: bool,
        files: &[String],
    ) {
        if !self.is_current(ticket) {
            return;
        }
        let Some(key) = self.listing_key(provider_id, path, recursive) else {
            return;
        };
        let ttl = self.config.listing_ttl;
        if self
            .remote_fill(ticket, &listing_remote_key(&key), &files, ttl)
            .await
        {
            self.listings.insert(key, entry(Arc::new(files.to_vec()), ttl));
        }
    }

    /// Evict a mutated path: its content and metadata, and the listings of
    /// the path itself and every ancestor directory.
    pub async fn invalidate(&self, provider_id: &str, path: &str) {
        self.bump_epoch();
        let Some(path) = normalize_path(path) else {
            return;
        };
        let key = CacheKey {
            provider_id: provider_id.to_string(),
            path: path.clone(),
        };
        self.content.invalidate(&key);
        self.metadata.invalidate(&key);

        let mut remote_keys = vec![content_key(&key), metadata_key(&key)];
        for dir in self_and_ancestors(&path) {
            for recursive in [false, true] {
                let listing = ListingKey {
                    provider_id: provider_id.to_string(),
                    path: dir.clone(),
                    recursive,
                };
                remote_keys.push(listing_remote_key(&listing));
                self.listings.invalidate(&listing);
            }
        }

        if let Some(remote) = &self.distributed {
            for remote_key in remote_keys {
                if let Err(e) = remote.remove(&remote_key).await {
                    tracing::warn!(key = %remote_key, error = %e, "distributed cache eviction failed");
                }
            }
        }
        tracing::debug!(provider_id, path = %path, "cache invalidated");
    }

    /// [`invalidate`](Self::invalidate) plus everything below `path`, for
    /// deletes and moves of directories.
    pub async fn invalidate_tree(&self, provider_id: &str, path: &str) {
        self.invalidate(provider_id, path).await;
        let Some(path) = normalize_path(path) else {
            return;
        };
        self.evict_below(provider_id, Some(&path)).await;
    }

    /// Drop every entry of one provider, e.g. after its configuration changed.
    pub async fn invalidate_provider(&self, provider_id: &str) {
        self.bump_epoch();
        self.evict_below(provider_id, None).await;
        tracing::debug!(provider_id, "provider cache cleared");
    }

    async fn evict_below(&self, provider_id: &str, path: Option<&str>) {
        let prefix = match path {
            Some(p) if !p.is_empty() => Some(format!("{}/", p)),
            _ => None,
        };
        let below = |candidate_provider: &str, candidate: &str| {
            candidate_provider == provider_id
                && prefix.as_deref().is_none_or(|p| candidate.starts_with(p))
        };

        let content: Vec<Arc<CacheKey>> = self
            .content
            .iter()
            .filter(|(k, _)| below(&k.provider_id, &k.path))
            .map(|(k, _)| k)
            .collect();
        for key in content {
            self.content.invalidate(&*key);
        }
        let metadata: Vec<Arc<CacheKey>> = self
            .metadata
            .iter()
            .filter(|(k, _)| below(&k.provider_id, &k.path))
            .map(|(k, _)| k)
            .collect();
        for key in metadata {
            self.metadata.invalidate(&*key);
        }
        let listings: Vec<Arc<ListingKey>> = self
            .listings
            .iter()
            .filter(|(k, _)| below(&k.provider_id, &k.path))
            .map(|(k, _)| k)
            .collect();
        for key in listings {
            self.listings.invalidate(&*key);
        }

        if let Some(remote) = &self.distributed {
            let suffix = prefix.as_deref().unwrap_or("");
            for kind in ["content", "metadata", "listing"] {
                let remote_prefix = remote_key(kind, provider_id, suffix);
                if let Err(e) = remote.remove_prefix(&remote_prefix).await {
                    tracing::warn!(prefix = %remote_prefix, error = %e, "distributed cache eviction failed");
                }
            }
        }
    }

    fn key(&self, provider_id: &str, path: &str) -> Option<CacheKey> {
        if !self.config.enabled {
            return None;
        }
        Some(CacheKey {
            provider_id: provider_id.to_string(),
            path: normalize_path(path)?,
        })
    }

    fn listing_key(&self, provider_id: &str, path: &str, recursive: bool) -> Option<ListingKey> {
        let key = self.key(provider_id, path)?;
        Some(ListingKey {
            provider_id: key.provider_id,
            path: key.path,
            recursive,
        })
    }

    fn fillable(&self, ticket: FillTicket, provider_id: &str, path: &str) -> Option<CacheKey> {
        if !self.is_current(ticket) {
            tracing::debug!(provider_id, "cache fill skipped after concurrent invalidation");
            return None;
        }
        self.key(provider_id, path)
    }

    fn is_current(&self, ticket: FillTicket) -> bool {
        self.epoch.load(Ordering::Acquire) == ticket.0
    }

    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    async fn remote_get<T: DeserializeOwned>(&self, key: &str) -> Option<(T, Duration)> {
        let remote = self.distributed.as_ref()?;
        let raw = match remote.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "distributed cache read failed");
                return None;
            }
        };
        let stored: StoredEntry<T> = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding malformed distributed cache entry");
                return None;
            }
        };
        let remaining = (stored.expires_at - Utc::now()).to_std().ok()?;
        if remaining.is_zero() {
            return None;
        }
        Some((stored.value, remaining))
    }

    /// Write a fill to the shared tier, then confirm no invalidation ran
    /// meanwhile. A fill that lost the race is removed again, since the
    /// invalidation's own removal may have landed before the write.
    ///
    /// Returns whether the local tier may take the value.
    async fn remote_fill<T: Serialize>(&self, ticket: FillTicket, key: &str, value: &T, ttl: Duration) -> bool {
        self.remote_set(key, value, ttl).await;
        if self.is_current(ticket) {
            return true;
        }
        if let Some(remote) = &self.distributed {
            if let Err(e) = remote.remove(key).await {
                tracing::warn!(key = %key, error = %e, "distributed cache eviction failed");
            }
        }
        tracing::debug!(key = %key, "cache fill withdrawn after concurrent invalidation");
        false
    }

    async fn remote_set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Some(remote) = &self.distributed else {
            return;
        };
        let Some(expires_at) = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| Utc::now().checked_add_signed(delta))
        else {
            return;
        };
        let raw = match serde_json::to_string(&StoredEntry { value, expires_at }) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache entry not serializable");
                return;
            }
        };
        if let Err(e) = remote.set(key, raw, ttl).await {
            tracing::warn!(key = %key, error = %e, "distributed cache write failed");
        }
    }
}

fn build_cache<K, V>(config: &CacheConfig, ttl: Duration) -> Cache<K, CacheEntry<V>>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    Cache::builder()
        .max_capacity(config.max_entries)
        .time_to_live(ttl.max(Duration::from_millis(1)))
        .eviction_policy(EvictionPolicy::lru())
        .build()
}

fn entry<T>(value: T, ttl: Duration) -> CacheEntry<T> {
    CacheEntry {
        value,
        expires_at: Instant::now() + ttl,
    }
}

/// Live value for `key`. moka expiry is lazy, so the entry's own deadline is
/// checked as well.
fn local_get<K, V>(cache: &Cache<K, CacheEntry<V>>, key: &K) -> Option<V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let entry = cache.get(key)?;
    if entry.expires_at <= Instant::now() {
        cache.invalidate(key);
        return None;
    }
    Some(entry.value)
}

fn content_key(key: &CacheKey) -> String {
    remote_key("content", &key.provider_id, &key.path)
}

fn metadata_key(key: &CacheKey) -> String {
    remote_key("metadata", &key.provider_id, &key.path)
}

fn listing_remote_key(key: &ListingKey) -> String {
    let mode = if key.recursive { "r" } else { "n" };
    format!("{}#{}", remote_key("listing", &key.provider_id, &key.path), mode)
}

/// `fsgate:{kind}:{provider}:{path}` with `%`, `:` and `#` percent-escaped
/// in both components, so neither can run into the other. Escaping maps
/// characters one by one, which keeps path prefixes usable for
/// `remove_prefix`.
fn remote_key(kind: &str, provider_id: &str, path: &str) -> String {
    format!("fsgate:{}:{}:{}", kind, escape_component(provider_id), escape_component(path))
}

fn escape_component(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            '#' => escaped.push_str("%23"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// `a/b/c` -> `a/b/c`, `a/b`, `a`, `` (the root).
fn self_and_ancestors(path: &str) -> Vec<String> {
    let mut dirs = vec![path.to_string()];
    let mut current = path;
    while let Some((parent, _)) = current.rsplit_once('/') {
        dirs.push(parent.to_string());
        current = parent;
    }
    if !path.is_empty() {
        dirs.push(String::new());
    }
    dirs
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::InMemoryDistributedCache;
    use crate::error::Result;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    fn layer() -> CacheLayer {
        CacheLayer::new(CacheConfig::new())
    }

    /// Shared tier that can park the next `set` (before writing) or the next
    /// `get` (after reading) until released.
    #[derive(Default)]
    struct GatedCache {
        inner: InMemoryDistributedCache,
        hold_set: AtomicBool,
        hold_get: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl GatedCache {
        async fn gate(&self, armed: &AtomicBool) {
            if armed.swap(false, Ordering::AcqRel) {
                self.entered.notify_one();
                self.release.notified().await;
            }
        }
    }

    #[async_trait]
    impl DistributedCache for GatedCache {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            let value = self.inner.get(key).await?;
            self.gate(&self.hold_get).await;
            Ok(value)
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
            self.gate(&self.hold_set).await;
            self.inner.set(key, value, ttl).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }

        async fn remove_prefix(&self, prefix: &str) -> Result<()> {
            self.inner.remove_prefix(prefix).await
        }
    }

    #[test]
    fn test_self_and_ancestors() {
        assert_eq!(
            self_and_ancestors("a/b/c"),
            vec!["a/b/c".to_string(), "a/b".into(), "a".into(), "".into()]
        );
        assert_eq!(self_and_ancestors(""), vec!["".to_string()]);
    }

    #[tokio::test]
    async fn test_content_roundtrip_and_normalized_key() {
        let cache = layer();
        let ticket = cache.fill_ticket();
        cache.put_content(ticket, "p", "docs/./a.txt", b"hello").await;
        assert_eq!(cache.get_content("p", "/docs/a.txt").await, Some(b"hello".to_vec()));
        assert_eq!(cache.get_content("other", "docs/a.txt").await, None);
    }

    #[tokio::test]
    async fn test_stale_ticket_is_rejected() {
        let cache = layer();
        let ticket = cache.fill_ticket();
        cache.invalidate("p", "a.txt").await;
        cache.put_content(ticket, "p", "a.txt", b"old").await;
        assert_eq!(cache.get_content("p", "a.txt").await, None);
    }

    #[tokio::test]
    async fn test_invalidate_evicts_ancestor_listings() {
        let cache = layer();
        let t = cache.fill_ticket();
        let files = vec!["a/b/c.txt".to_string()];
        cache.put_listing(t, "p", "", true, &files).await;
        cache.put_listing(t, "p", "a", false, &files).await;
        cache.put_listing(t, "p", "a/b", false, &files).await;
        cache.put_listing(t, "p", "x", false, &files).await;

        cache.invalidate("p", "a/b/c.txt").await;
        assert_eq!(cache.get_listing("p", "", true).await, None);
        assert_eq!(cache.get_listing("p", "a", false).await, None);
        assert_eq!(cache.get_listing("p", "a/b", false).await, None);
        assert_eq!(cache.get_listing("p", "x", false).await, Some(files));
    }

    #[tokio::test]
    async fn test_invalidate_tree_evicts_descendants() {
        let cache = layer();
        let t = cache.fill_ticket();
        cache.put_content(t, "p", "dir/a", b"1").await;
        cache.put_content(t, "p", "dir/sub/b", b"2").await;
        cache.put_content(t, "p", "dir2/c", b"3").await;

        cache.invalidate_tree("p", "dir").await;
        assert_eq!(cache.get_content("p", "dir/a").await, None);
        assert_eq!(cache.get_content("p", "dir/sub/b").await, None);
        assert_eq!(cache.get_content("p", "dir2/c").await, Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn test_expired_entry_not_served() {
        let cache = CacheLayer::new(CacheConfig::new().content_ttl(Duration::from_millis(20)));
        cache.put_content(cache.fill_ticket(), "p", "a", b"v").await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get_content("p", "a").await, None);
    }

    #[tokio::test]
    async fn test_distributed_tier_fills_local() {
        let shared = Arc::new(InMemoryDistributedCache::new());
        let writer = CacheLayer::new(CacheConfig::new()).with_distributed(shared.clone());
        let reader = CacheLayer::new(CacheConfig::new()).with_distributed(shared.clone());

        writer.put_content(writer.fill_ticket(), "p", "a.bin", &[0, 159, 255]).await;
        assert_eq!(reader.get_content("p", "a.bin").await, Some(vec![0, 159, 255]));

        writer.invalidate("p", "a.bin").await;
        // Reader keeps its local copy until TTL; the shared tier is clear
        assert!(shared.get("fsgate:content:p:a.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fill_racing_invalidation_leaves_no_shared_entry() {
        let shared = Arc::new(GatedCache::default());
        let cache = CacheLayer::new(CacheConfig::new()).with_distributed(shared.clone());
        let other = CacheLayer::new(CacheConfig::new()).with_distributed(shared.clone());

        let ticket = cache.fill_ticket();
        shared.hold_set.store(true, Ordering::Release);
        tokio::join!(cache.put_content(ticket, "p", "a.txt", b"old"), async {
            shared.entered.notified().await;
            cache.invalidate("p", "a.txt").await;
            shared.release.notify_one();
        });

        assert_eq!(cache.get_content("p", "a.txt").await, None);
        assert_eq!(other.get_content("p", "a.txt").await, None);
        assert!(shared.inner.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_and_listing_fills_racing_invalidation() {
        let shared = Arc::new(GatedCache::default());
        let cache = CacheLayer::new(CacheConfig::new()).with_distributed(shared.clone());

        let ticket = cache.fill_ticket();
        shared.hold_set.store(true, Ordering::Release);
        let metadata = FileMetadata {
            path: "a.txt".into(),
            size: 3,
            is_directory: false,
            modified: Utc::now(),
            created: Utc::now(),
        };
        tokio::join!(cache.put_metadata(ticket, "p", "a.txt", &metadata), async {
            shared.entered.notified().await;
            cache.invalidate("p", "a.txt").await;
            shared.release.notify_one();
        });
        assert_eq!(cache.get_metadata("p", "a.txt").await, None);

        let ticket = cache.fill_ticket();
        shared.hold_set.store(true, Ordering::Release);
        let files = vec!["a.txt".to_string()];
        tokio::join!(cache.put_listing(ticket, "p", "", false, &files), async {
            shared.entered.notified().await;
            cache.invalidate("p", "a.txt").await;
            shared.release.notify_one();
        });
        assert_eq!(cache.get_listing("p", "", false).await, None);
        assert!(shared.inner.is_empty());
    }

    #[tokio::test]
    async fn test_remote_hit_racing_invalidation_not_kept_locally() {
        let shared = Arc::new(GatedCache::default());
        let writer = CacheLayer::new(CacheConfig::new()).with_distributed(shared.clone());
        let reader = CacheLayer::new(CacheConfig::new()).with_distributed(shared.clone());
        writer.put_content(writer.fill_ticket(), "p", "a.txt", b"old").await;

        shared.hold_get.store(true, Ordering::Release);
        let (served, _) = tokio::join!(reader.get_content("p", "a.txt"), async {
            shared.entered.notified().await;
            reader.invalidate("p", "a.txt").await;
            shared.release.notify_one();
        });
        // The read overlapped the invalidation, so either answer is fine for
        // it, but the stale bytes must not outlive it.
        assert_eq!(served, Some(b"old".to_vec()));
        assert_eq!(reader.get_content("p", "a.txt").await, None);
    }

    #[tokio::test]
    async fn test_remote_keys_do_not_collide_on_separators() {
        let shared = Arc::new(InMemoryDistributedCache::new());
        let writer = CacheLayer::new(CacheConfig::new()).with_distributed(shared.clone());
        let reader = CacheLayer::new(CacheConfig::new()).with_distributed(shared.clone());

        writer.put_content(writer.fill_ticket(), "tenant", "x:secret.txt", b"s").await;
        assert_eq!(reader.get_content("tenant:x", "secret.txt").await, None);

        writer.put_content(writer.fill_ticket(), "tenant:x", "a.txt", b"a").await;
        writer.invalidate_provider("tenant").await;
        assert_eq!(reader.get_content("tenant:x", "a.txt").await, Some(b"a".to_vec()));
        assert_eq!(reader.get_content("tenant", "x:secret.txt").await, None);

        assert_eq!(remote_key("listing", "a#b", "%3A"), "fsgate:listing:a%23b:%253A");
    }

    #[tokio::test]
    async fn test_oversized_content_not_cached() {
        let cache = CacheLayer::new(CacheConfig::new().max_content_bytes(2));
        cache.put_content(cache.fill_ticket(), "p", "a", b"abc").await;
        assert_eq!(cache.get_content("p", "a").await, None);
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let cache = CacheLayer::new(CacheConfig::disabled());
        cache.put_content(cache.fill_ticket(), "p", "a", b"v").await;
        assert_eq!(cache.get_content("p", "a").await, None);
    }
}
