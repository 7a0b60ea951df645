//! Per-provider storage quotas and request path limits.

use std::collections::HashMap;
use std::path::{Component, Path};

use crate::error::{Error, Result};

/// Nesting limit for request paths
pub const DEFAULT_MAX_PATH_DEPTH: usize = 100;

/// Byte limit for one path segment
pub const DEFAULT_MAX_SEGMENT_BYTES: usize = 255;

/// Byte limit for a whole request path
pub const DEFAULT_MAX_PATH_BYTES: usize = 4096;

/// Limits applied to one provider instance.
///
/// | Limit | Default | Config key |
/// |-------|---------|------------|
/// | `max_total_bytes` | unlimited | `maxTotalBytes` |
/// | `max_file_size` | unlimited | `maxFileSize` |
/// | `max_file_count` | unlimited | `maxFileCount` |
/// | `max_path_depth` | 100 | - |
/// | `max_segment_bytes` | 255 | - |
/// | `max_path_bytes` | 4096 | - |
#[derive(Debug, Clone)]
pub struct Quota {
    pub max_total_bytes: u64,
    pub max_file_size: u64,
    /// Directories do not count
    pub max_file_count: u64,
    pub max_path_depth: usize,
    pub max_segment_bytes: usize,
    pub max_path_bytes: usize,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            max_total_bytes: u64::MAX,
            max_file_size: u64::MAX,
            max_file_count: u64::MAX,
            max_path_depth: DEFAULT_MAX_PATH_DEPTH,
            max_segment_bytes: DEFAULT_MAX_SEGMENT_BYTES,
            max_path_bytes: DEFAULT_MAX_PATH_BYTES,
        }
    }
}

impl Quota {
    /// Unlimited storage with default path limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `maxTotalBytes`, `maxFileSize` and `maxFileCount` from a
    /// provider configuration. Absent keys stay unlimited.
    pub fn from_config(config: &HashMap<String, String>) -> Result<Self> {
        let limit = |key: &str| -> Result<u64> {
            config.get(key).map_or(Ok(u64::MAX), |raw| {
                raw.trim().parse::<u64>().map_err(|_| {
                    Error::Configuration(format!("{} must be a non-negative integer", key))
                })
            })
        };
        Ok(Self {
            max_total_bytes: limit("maxTotalBytes")?,
            max_file_size: limit("maxFileSize")?,
            max_file_count: limit("maxFileCount")?,
            ..Self::default()
        })
    }

    pub fn max_total_bytes(mut self, bytes: u64) -> Self {
        self.max_total_bytes = bytes;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn max_file_count(mut self, count: u64) -> Self {
        self.max_file_count = count;
        self
    }

    pub fn max_path_depth(mut self, depth: usize) -> Self {
        self.max_path_depth = depth;
        self
    }

    /// Check the shape of a request path before it is resolved.
    ///
    /// Control and bidi-override characters are denied outright, since they
    /// make a path display as something other than what it names. Oversized
    /// paths are quota errors.
    pub fn validate_path(&self, path: &Path) -> Result<()> {
        let bytes = path.as_os_str().len();
        if bytes > self.max_path_bytes {
            return Err(QuotaExceeded::PathTooLong {
                bytes,
                limit: self.max_path_bytes,
            }
            .into());
        }

        let mut depth = 0usize;
        for component in path.components() {
            match component {
                Component::Normal(segment) => {
                    let segment = segment.to_string_lossy();
                    if segment.len() > self.max_segment_bytes {
                        return Err(QuotaExceeded::SegmentTooLong {
                            bytes: segment.len(),
                            limit: self.max_segment_bytes,
                        }
                        .into());
                    }
                    if let Some(ch) = segment.chars().find(|c| is_deceptive(*c)) {
                        return Err(Error::AccessDenied(format!(
                            "path contains disallowed character U+{:04X}",
                            ch as u32
                        )));
                    }
                    depth += 1;
                }
                Component::ParentDir => depth = depth.saturating_sub(1),
                _ => {}
            }
        }

        if depth > self.max_path_depth {
            return Err(QuotaExceeded::PathTooDeep {
                depth,
                limit: self.max_path_depth,
            }
            .into());
        }
        Ok(())
    }

    /// Whether writes need the provider's current usage to be checked.
    pub fn limits_usage(&self) -> bool {
        self.max_total_bytes != u64::MAX || self.max_file_count != u64::MAX
    }

    /// Check one file's size on its own, before any usage is known.
    pub fn check_file_size(&self, size: u64) -> std::result::Result<(), QuotaExceeded> {
        if size > self.max_file_size {
            return Err(QuotaExceeded::FileTooLarge {
                size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Check a write of `new_size` bytes replacing `old_size` bytes.
    ///
    /// `is_new_file` counts against the file limit.
    pub fn check_write(
        &self,
        usage: &StorageUsage,
        old_size: u64,
        new_size: u64,
        is_new_file: bool,
    ) -> std::result::Result<(), QuotaExceeded> {
        self.check_file_size(new_size)?;
        if is_new_file && usage.file_count >= self.max_file_count {
            return Err(QuotaExceeded::TooManyFiles {
                count: usage.file_count,
                limit: self.max_file_count,
            });
        }
        let used = usage.total_bytes.saturating_sub(old_size);
        if used.saturating_add(new_size) > self.max_total_bytes {
            return Err(QuotaExceeded::StorageFull {
                used,
                requested: new_size,
                limit: self.max_total_bytes,
            });
        }
        Ok(())
    }
}

/// C0/C1 controls and Unicode bidi overrides
fn is_deceptive(c: char) -> bool {
    c.is_control() || matches!(c, '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}')
}

/// A storage or path limit was hit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaExceeded {
    #[error("provider storage full ({used} used, {requested} requested, limit {limit} bytes)")]
    StorageFull { used: u64, requested: u64, limit: u64 },

    #[error("file of {size} bytes is over the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("provider holds {count} files, limit is {limit}")]
    TooManyFiles { count: u64, limit: u64 },

    #[error("path nests {depth} levels, limit is {limit}")]
    PathTooDeep { depth: usize, limit: usize },

    #[error("path segment of {bytes} bytes is over the {limit} byte limit")]
    SegmentTooLong { bytes: usize, limit: usize },

    #[error("path of {bytes} bytes is over the {limit} byte limit")]
    PathTooLong { bytes: usize, limit: usize },
}

/// Bytes and files a provider currently holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageUsage {
    pub total_bytes: u64,
    pub file_count: u64,
}
