//! Storage providers.
//!
//! Every backend implements [`StorageProvider`] over root-relative paths.
//! Paths are confined to the provider root by [`PathSandbox`] before any
//! backend call; [`Quota`] bounds what a provider may store.
//!
//! # Built-in providers
//!
//! - [`LocalProvider`]: a directory on the host filesystem
//! - [`MemoryProvider`]: a process-local map, for scratch space and tests
//!
//! Other backends plug in through [`ProviderFactory`].

mod local;
mod memory;
mod quota;
mod registry;
mod sandbox;
mod traits;

pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use quota::{Quota, QuotaExceeded, StorageUsage};
pub use registry::{ProviderFactory, ProviderRegistry};
pub use sandbox::{PathSandbox, default_case_sensitivity};
pub use traits::{FileMetadata, ProviderConfig, ProviderDescriptor, ProviderType, StorageProvider};
