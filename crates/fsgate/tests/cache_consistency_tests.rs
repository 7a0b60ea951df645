//! Read-your-writes and invalidation behavior of the cache layer as seen
//! through the router.

use fsgate::{
    CacheConfig, DistributedCache, Error, ErrorKind, FileMetadata, Gateway,
    InMemoryDistributedCache, MemoryProvider, ProviderConfig, ProviderDescriptor, ProviderType,
    Result, StorageProvider, async_trait,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Memory backend whose reads take a configurable time and are counted.
struct SlowProvider {
    inner: MemoryProvider,
    read_delay_ms: AtomicU64,
    reads: AtomicUsize,
}

impl SlowProvider {
    fn new() -> Self {
        Self {
            inner: MemoryProvider::new(),
            read_delay_ms: AtomicU64::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    fn set_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageProvider for SlowProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Memory
    }

    async fn initialize(&self, config: &ProviderConfig) -> Result<()> {
        self.inner.initialize(config).await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        // Snapshot first, then stall: models a read that loses a race
        let content = self.inner.read_file(path).await;
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        content
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        self.inner.write_file(path, content).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.inner.delete_file(path).await
    }

    async fn list_files(&self, path: &str, recursive: bool) -> Result<Vec<String>> {
        self.inner.list_files(path, recursive).await
    }

    async fn stat(&self, path: &str) -> Result<FileMetadata> {
        self.inner.stat(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path).await
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        self.inner.create_directory(path).await
    }

    async fn test_connection(&self) -> bool {
        self.inner.test_connection().await
    }
}

async fn slow_gateway(timeout: Option<Duration>) -> (Gateway, Arc<SlowProvider>) {
    let mut builder = Gateway::builder().permission("alice", "*");
    if let Some(timeout) = timeout {
        builder = builder.request_timeout(timeout);
    }
    let gateway = builder.build().await.unwrap();

    let provider = Arc::new(SlowProvider::new());
    provider.initialize(&ProviderConfig::new()).await.unwrap();
    gateway.registry().insert_provider(
        ProviderDescriptor::new("slow", ProviderType::Memory),
        provider.clone(),
    );
    (gateway, provider)
}

#[tokio::test]
async fn repeated_reads_hit_the_cache() {
    let (gateway, provider) = slow_gateway(None).await;
    let router = gateway.router();
    router.write_file("alice", "slow", "a.txt", b"v1").await.unwrap();

    for _ in 0..3 {
        assert_eq!(router.read_file("alice", "slow", "a.txt").await.unwrap(), b"v1");
    }
    assert_eq!(provider.reads(), 1);
}

#[tokio::test]
async fn write_then_read_returns_new_content() {
    let (gateway, _) = slow_gateway(None).await;
    let router = gateway.router();
    router.write_file("alice", "slow", "a.txt", b"v1").await.unwrap();
    assert_eq!(router.read_file("alice", "slow", "a.txt").await.unwrap(), b"v1");

    router.write_file("alice", "slow", "a.txt", b"v2").await.unwrap();
    assert_eq!(router.read_file("alice", "slow", "a.txt").await.unwrap(), b"v2");
}

#[tokio::test]
async fn slow_read_racing_a_write_does_not_cache_stale_data() {
    let (gateway, provider) = slow_gateway(None).await;
    let router = gateway.router();
    router.write_file("alice", "slow", "a.txt", b"v1").await.unwrap();
    provider.set_delay(Duration::from_millis(100));

    let (stale, written) = tokio::join!(router.read_file("alice", "slow", "a.txt"), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        router.write_file("alice", "slow", "a.txt", b"v2").await
    });
    assert_eq!(stale.unwrap(), b"v1");
    written.unwrap();

    provider.set_delay(Duration::ZERO);
    assert_eq!(router.read_file("alice", "slow", "a.txt").await.unwrap(), b"v2");
}

#[tokio::test]
async fn delete_evicts_cached_content() {
    let (gateway, _) = slow_gateway(None).await;
    let router = gateway.router();
    router.write_file("alice", "slow", "a.txt", b"v1").await.unwrap();
    router.read_file("alice", "slow", "a.txt").await.unwrap();

    router.delete_file("alice", "slow", "a.txt").await.unwrap();
    let err = router.read_file("alice", "slow", "a.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn listings_follow_mutations_below_them() {
    let (gateway, _) = slow_gateway(None).await;
    let router = gateway.router();
    router.write_file("alice", "slow", "docs/a.txt", b"x").await.unwrap();
    assert_eq!(
        router.list_files("alice", "slow", "docs", false).await.unwrap(),
        vec!["docs/a.txt"]
    );
    assert_eq!(
        router.list_files("alice", "slow", "", true).await.unwrap(),
        vec!["docs/a.txt"]
    );

    router.write_file("alice", "slow", "docs/deep/b.txt", b"x").await.unwrap();
    router.copy_file("alice", "slow", "docs/a.txt", "docs/c.txt").await.unwrap();

    assert_eq!(
        router.list_files("alice", "slow", "docs", false).await.unwrap(),
        vec!["docs/a.txt", "docs/c.txt"]
    );
    assert_eq!(
        router.list_files("alice", "slow", "", true).await.unwrap(),
        vec!["docs/a.txt", "docs/c.txt", "docs/deep/b.txt"]
    );
}

#[tokio::test]
async fn move_evicts_source_and_destination() {
    let (gateway, _) = slow_gateway(None).await;
    let router = gateway.router();
    router.write_file("alice", "slow", "a.txt", b"old-a").await.unwrap();
    router.write_file("alice", "slow", "b.txt", b"old-b").await.unwrap();
    router.read_file("alice", "slow", "a.txt").await.unwrap();
    router.read_file("alice", "slow", "b.txt").await.unwrap();

    router.move_file("alice", "slow", "a.txt", "b.txt").await.unwrap();
    assert_eq!(router.read_file("alice", "slow", "b.txt").await.unwrap(), b"old-a");
    assert!(!router.exists("alice", "slow", "a.txt").await.unwrap());
}

#[tokio::test]
async fn timeout_is_retryable_and_caches_nothing() {
    let (gateway, provider) = slow_gateway(Some(Duration::from_millis(30))).await;
    let router = gateway.router();
    router.write_file("alice", "slow", "a.txt", b"v1").await.unwrap();

    provider.set_delay(Duration::from_millis(200));
    let err = router.read_file("alice", "slow", "a.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
    assert!(err.is_retryable());

    let response = gateway
        .execute(fsgate::OperationRequest::new(
            fsgate::Operation::Read,
            "slow",
            "a.txt",
            "alice",
        ))
        .await;
    assert!(!response.success);
    assert_eq!(
        response.message.as_deref(),
        Some("provider 'slow' is unavailable")
    );

    provider.set_delay(Duration::ZERO);
    let before = provider.reads();
    assert_eq!(router.read_file("alice", "slow", "a.txt").await.unwrap(), b"v1");
    assert_eq!(provider.reads(), before + 1);
}

#[tokio::test]
async fn disabled_cache_always_reads_through() {
    let gateway = Gateway::builder()
        .cache_config(CacheConfig::disabled())
        .permission("alice", "*")
        .build()
        .await
        .unwrap();
    let provider = Arc::new(SlowProvider::new());
    provider.initialize(&ProviderConfig::new()).await.unwrap();
    gateway
        .registry()
        .insert_provider(ProviderDescriptor::new("slow", ProviderType::Memory), provider.clone());

    let router = gateway.router();
    router.write_file("alice", "slow", "a.txt", b"x").await.unwrap();
    router.read_file("alice", "slow", "a.txt").await.unwrap();
    router.read_file("alice", "slow", "a.txt").await.unwrap();
    assert_eq!(provider.reads(), 2);
}

#[tokio::test]
async fn provider_update_drops_its_cache() {
    let gateway = Gateway::builder()
        .provider(ProviderDescriptor::new("mem", ProviderType::Memory))
        .permission("alice", "*")
        .build()
        .await
        .unwrap();
    let router = gateway.router();
    router.write_file("alice", "mem", "a.txt", b"x").await.unwrap();
    router.read_file("alice", "mem", "a.txt").await.unwrap();

    // A fresh memory instance starts empty
    let mut config = ProviderConfig::new();
    config.insert("basePath".into(), "/fresh".into());
    gateway.update_provider("mem", config).await.unwrap();

    let err = router.read_file("alice", "mem", "a.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_alias_sees_writes_through_the_real_path() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Gateway::builder()
        .provider(
            ProviderDescriptor::new("disk", ProviderType::Local)
                .config("basePath", dir.path().to_str().unwrap()),
        )
        .permission("alice", "*")
        .build()
        .await
        .unwrap();
    let router = gateway.router();
    router.write_file("alice", "disk", "real/f.txt", b"v1").await.unwrap();
    std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();

    assert_eq!(router.read_file("alice", "disk", "alias/f.txt").await.unwrap(), b"v1");
    router.write_file("alice", "disk", "real/f.txt", b"v2").await.unwrap();
    assert_eq!(router.read_file("alice", "disk", "alias/f.txt").await.unwrap(), b"v2");

    // And the other way round
    router.read_file("alice", "disk", "real/f.txt").await.unwrap();
    router.write_file("alice", "disk", "alias/f.txt", b"v3").await.unwrap();
    assert_eq!(router.read_file("alice", "disk", "real/f.txt").await.unwrap(), b"v3");
}

#[tokio::test]
async fn case_insensitive_root_shares_entries_across_spellings() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Gateway::builder()
        .provider(
            ProviderDescriptor::new("disk", ProviderType::Local)
                .config("basePath", dir.path().to_str().unwrap())
                .config("caseSensitive", "false"),
        )
        .permission("alice", "*")
        .build()
        .await
        .unwrap();
    let router = gateway.router();
    router.write_file("alice", "disk", "Docs/A.txt", b"v1").await.unwrap();
    assert_eq!(router.read_file("alice", "disk", "Docs/A.txt").await.unwrap(), b"v1");

    // docs/a.txt names the same cache entry, so this write evicts it
    router.write_file("alice", "disk", "docs/a.txt", b"v2").await.unwrap();
    let cached = gateway.cache().get_content("disk", "docs/a.txt").await;
    assert_eq!(cached, None);
}

mod distributed {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn shared_gateway(root: &std::path::Path, shared: Arc<InMemoryDistributedCache>) -> Gateway {
        Gateway::builder()
            .provider(
                ProviderDescriptor::new("disk", ProviderType::Local)
                    .config("basePath", root.to_str().unwrap()),
            )
            .permission("alice", "*")
            .distributed_cache(shared)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn instances_share_reads_and_evictions() {
        let dir = tempfile::tempdir().unwrap();
        let shared = Arc::new(InMemoryDistributedCache::new());
        let first = shared_gateway(dir.path(), shared.clone()).await;
        let second = shared_gateway(dir.path(), shared.clone()).await;

        first
            .router()
            .write_file("alice", "disk", "a.txt", b"v1")
            .await
            .unwrap();
        first.router().read_file("alice", "disk", "a.txt").await.unwrap();
        assert!(!shared.is_empty());

        // Changed behind the gateway's back: a shared hit still serves v1
        std::fs::write(dir.path().join("a.txt"), b"external").unwrap();
        assert_eq!(
            second.router().read_file("alice", "disk", "a.txt").await.unwrap(),
            b"v1"
        );

        // A write through any instance clears the shared entry
        second
            .router()
            .write_file("alice", "disk", "a.txt", b"v2")
            .await
            .unwrap();
        let third = shared_gateway(dir.path(), shared).await;
        assert_eq!(
            third.router().read_file("alice", "disk", "a.txt").await.unwrap(),
            b"v2"
        );
    }

    #[tokio::test]
    async fn provider_ids_with_separators_do_not_share_entries() {
        let shared = Arc::new(InMemoryDistributedCache::new());
        let build = |shared: Arc<InMemoryDistributedCache>| async move {
            Gateway::builder()
                .provider(ProviderDescriptor::new("tenant", ProviderType::Memory))
                .provider(ProviderDescriptor::new("tenant:x", ProviderType::Memory))
                .permission("alice", "*")
                .distributed_cache(shared)
                .build()
                .await
                .unwrap()
        };
        let first = build(shared.clone()).await;
        let second = build(shared).await;

        first
            .router()
            .write_file("alice", "tenant", "x:secret.txt", b"secret")
            .await
            .unwrap();
        first.router().read_file("alice", "tenant", "x:secret.txt").await.unwrap();

        let err = second
            .router()
            .read_file("alice", "tenant:x", "secret.txt")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    struct BrokenCache;

    #[async_trait]
    impl DistributedCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::ProviderUnavailable("cache down".into()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
            Err(Error::ProviderUnavailable("cache down".into()))
        }

        async fn remove(&self, _key: &str) -> Result<()> {
            Err(Error::ProviderUnavailable("cache down".into()))
        }

        async fn remove_prefix(&self, _prefix: &str) -> Result<()> {
            Err(Error::ProviderUnavailable("cache down".into()))
        }
    }

    #[tokio::test]
    async fn unavailable_shared_tier_is_a_miss() {
        let gateway = Gateway::builder()
            .provider(ProviderDescriptor::new("mem", ProviderType::Memory))
            .permission("alice", "*")
            .distributed_cache(Arc::new(BrokenCache))
            .build()
            .await
            .unwrap();
        let router = gateway.router();

        router.write_file("alice", "mem", "a.txt", b"v1").await.unwrap();
        assert_eq!(router.read_file("alice", "mem", "a.txt").await.unwrap(), b"v1");
        router.write_file("alice", "mem", "a.txt", b"v2").await.unwrap();
        assert_eq!(router.read_file("alice", "mem", "a.txt").await.unwrap(), b"v2");
        router.delete_file("alice", "mem", "a.txt").await.unwrap();
    }
}
