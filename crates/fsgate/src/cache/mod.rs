//! Two-tier cache for provider reads.
//!
//! The local tier is a set of bounded moka caches, one per entry kind. The
//! optional distributed tier ([`DistributedCache`]) is consulted on a local
//! miss. Mutations evict from both tiers only after the provider call has
//! succeeded.
//!
//! Instances do not broadcast invalidations to each other. An entry another
//! instance cached stays visible there until its TTL runs out.

mod distributed;
mod layer;

pub use distributed::{DistributedCache, InMemoryDistributedCache};
pub use layer::{CacheLayer, FillTicket};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default content TTL: 5 minutes
pub const DEFAULT_CONTENT_TTL: Duration = Duration::from_secs(300);

/// Default metadata TTL: 2 minutes
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(120);

/// Default listing TTL: 30 seconds
pub const DEFAULT_LISTING_TTL: Duration = Duration::from_secs(30);

/// Default entry bound per kind
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Default largest file kept in the content cache: 1MB
pub const DEFAULT_MAX_CONTENT_BYTES: u64 = 1_048_576;

/// Cache configuration.
///
/// # Example
///
/// ```rust
/// use fsgate::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::new()
///     .content_ttl(Duration::from_secs(60))
///     .listing_ttl(Duration::from_secs(5))
///     .max_entries(1_000);
/// assert_eq!(config.max_entries, 1_000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Disabled caches never store anything
    pub enabled: bool,

    /// Entry bound for each of the content, metadata and listing caches.
    /// Least recently used entries are evicted first.
    pub max_entries: u64,

    #[serde(rename = "contentTtlSecs", with = "crate::config::duration_secs")]
    pub content_ttl: Duration,

    #[serde(rename = "metadataTtlSecs", with = "crate::config::duration_secs")]
    pub metadata_ttl: Duration,

    #[serde(rename = "listingTtlSecs", with = "crate::config::duration_secs")]
    pub listing_ttl: Duration,

    /// Files larger than this are served but not cached
    pub max_content_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            content_ttl: DEFAULT_CONTENT_TTL,
            metadata_ttl: DEFAULT_METADATA_TTL,
            listing_ttl: DEFAULT_LISTING_TTL,
            max_content_bytes: DEFAULT_MAX_CONTENT_BYTES,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that caches nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    pub fn content_ttl(mut self, ttl: Duration) -> Self {
        self.content_ttl = ttl;
        self
    }

    pub fn metadata_ttl(mut self, ttl: Duration) -> Self {
        self.metadata_ttl = ttl;
        self
    }

    pub fn listing_ttl(mut self, ttl: Duration) -> Self {
        self.listing_ttl = ttl;
        self
    }

    pub fn max_content_bytes(mut self, bytes: u64) -> Self {
        self.max_content_bytes = bytes;
        self
    }
}
