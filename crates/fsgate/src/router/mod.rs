//! Request routing.
//!
//! [`ProviderRouter`] runs every operation through the same pipeline:
//!
//! 1. resolve the provider id in the registry
//! 2. check the caller's permission for the operation and path
//! 3. for reads, consult the cache under the provider's key for the path
//! 4. call the provider (bounded by the request timeout)
//! 5. for mutations, evict affected cache entries
//! 6. record an audit event
//!
//! The first failing step ends the request. Errors keep their kind and are
//! wrapped with the provider, path and operation they belong to.

mod audit;
mod request;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use request::{ContentEncoding, Operation, OperationRequest, OperationResponse};

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::acl::{AccessControl, AclOperation};
use crate::cache::CacheLayer;
use crate::error::{Error, RequestContext, Result};
use crate::logging_impl::sanitize_for_log;
use crate::provider::{FileMetadata, ProviderRegistry, StorageProvider};

/// Routes file operations to providers.
///
/// Holds no per-request state; share one instance across tasks.
pub struct ProviderRouter {
    registry: Arc<ProviderRegistry>,
    acl: Arc<AccessControl>,
    cache: Arc<CacheLayer>,
    audit: Arc<dyn AuditSink>,
    timeout: Option<Duration>,
}

impl ProviderRouter {
    pub fn new(registry: Arc<ProviderRegistry>, acl: Arc<AccessControl>, cache: Arc<CacheLayer>) -> Self {
        Self {
            registry,
            acl,
            cache,
            audit: Arc::new(TracingAuditSink),
            timeout: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Abort provider calls that take longer than `timeout`.
    ///
    /// The provider future is dropped, no cache entry is touched and the
    /// request fails with [`Error::ProviderUnavailable`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn access_control(&self) -> &Arc<AccessControl> {
        &self.acl
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub async fn read_file(&self, user_id: &str, provider_id: &str, path: &str) -> Result<Vec<u8>> {
        let op = Op::new(user_id, provider_id, "read", path);
        self.audited(&op, async {
            let provider = self.resolve(&op, AclOperation::Read, path).await?;
            let key = self.call(provider.cache_key(path)).await?;
            if let Some(content) = self.cache.get_content(provider_id, &key).await {
                return Ok(content);
            }
            let ticket = self.cache.fill_ticket();
            let content = self.call(provider.read_file(path)).await?;
            self.cache.put_content(ticket, provider_id, &key, &content).await;
            Ok(content)
        })
        .await
    }

    pub async fn write_file(
        &self,
        user_id: &str,
        provider_id: &str,
        path: &str,
        content: &[u8],
    ) -> Result<()> {
        let op = Op::new(user_id, provider_id, "write", path);
        self.audited(&op, async {
            let provider = self.resolve(&op, AclOperation::Write, path).await?;
            let key = self.call(provider.cache_key(path)).await?;
            self.call(provider.write_file(path, content)).await?;
            self.cache.invalidate(provider_id, &key).await;
            Ok(())
        })
        .await
    }

    /// Delete a file or directory tree. Deleting a missing path succeeds.
    pub async fn delete_file(&self, user_id: &str, provider_id: &str, path: &str) -> Result<()> {
        let op = Op::new(user_id, provider_id, "delete", path);
        self.audited(&op, async {
            let provider = self.resolve(&op, AclOperation::Delete, path).await?;
            let key = self.call(provider.cache_key(path)).await?;
            self.call(provider.delete_file(path)).await?;
            self.cache.invalidate_tree(provider_id, &key).await;
            Ok(())
        })
        .await
    }

    pub async fn list_files(
        &self,
        user_id: &str,
        provider_id: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<String>> {
        let op = Op::new(user_id, provider_id, "list", path);
        self.audited(&op, async {
            let provider = self.resolve(&op, AclOperation::List, path).await?;
            let key = self.call(provider.cache_key(path)).await?;
            if let Some(files) = self.cache.get_listing(provider_id, &key, recursive).await {
                return Ok(files);
            }
            let ticket = self.cache.fill_ticket();
            let files = self.call(provider.list_files(path, recursive)).await?;
            self.cache
                .put_listing(ticket, provider_id, &key, recursive, &files)
                .await;
            Ok(files)
        })
        .await
    }

    pub async fn stat(&self, user_id: &str, provider_id: &str, path: &str) -> Result<FileMetadata> {
        let op = Op::new(user_id, provider_id, "stat", path);
        self.audited(&op, async {
            let provider = self.resolve(&op, AclOperation::Read, path).await?;
            let key = self.call(provider.cache_key(path)).await?;
            if let Some(metadata) = self.cache.get_metadata(provider_id, &key).await {
                return Ok(metadata);
            }
            let ticket = self.cache.fill_ticket();
            let metadata = self.call(provider.stat(path)).await?;
            self.cache
                .put_metadata(ticket, provider_id, &key, &metadata)
                .await;
            Ok(metadata)
        })
        .await
    }

    pub async fn exists(&self, user_id: &str, provider_id: &str, path: &str) -> Result<bool> {
        let op = Op::new(user_id, provider_id, "exists", path);
        self.audited(&op, async {
            let provider = self.resolve(&op, AclOperation::Read, path).await?;
            let key = self.call(provider.cache_key(path)).await?;
            if self.cache.get_metadata(provider_id, &key).await.is_some() {
                return Ok(true);
            }
            self.call(provider.exists(path)).await
        })
        .await
    }

    pub async fn create_directory(&self, user_id: &str, provider_id: &str, path: &str) -> Result<()> {
        let op = Op::new(user_id, provider_id, "create", path);
        self.audited(&op, async {
            let provider = self.resolve(&op, AclOperation::Create, path).await?;
            let key = self.call(provider.cache_key(path)).await?;
            self.call(provider.create_directory(path)).await?;
            self.cache.invalidate(provider_id, &key).await;
            Ok(())
        })
        .await
    }

    /// Move within one provider. Needs `delete` on the source and `write` on
    /// the destination.
    pub async fn move_file(&self, user_id: &str, provider_id: &str, from: &str, to: &str) -> Result<()> {
        let op = Op::new(user_id, provider_id, "move", from).destination(to);
        self.audited(&op, async {
            let provider = self.resolve(&op, AclOperation::Delete, from).await?;
            self.authorize(&op, AclOperation::Write, to).await?;
            // Keyed before the move, while the source still resolves
            let from_key = self.call(provider.cache_key(from)).await?;
            let to_key = self.call(provider.cache_key(to)).await?;
            self.call(provider.move_file(from, to)).await?;
            self.cache.invalidate_tree(provider_id, &from_key).await;
            self.cache.invalidate_tree(provider_id, &to_key).await;
            Ok(())
        })
        .await
    }

    /// Copy within one provider. Needs `read` on the source and `write` on
    /// the destination.
    pub async fn copy_file(&self, user_id: &str, provider_id: &str, from: &str, to: &str) -> Result<()> {
        let op = Op::new(user_id, provider_id, "copy", from).destination(to);
        self.audited(&op, async {
            let provider = self.resolve(&op, AclOperation::Read, from).await?;
            self.authorize(&op, AclOperation::Write, to).await?;
            let to_key = self.call(provider.cache_key(to)).await?;
            self.call(provider.copy_file(from, to)).await?;
            self.cache.invalidate_tree(provider_id, &to_key).await;
            Ok(())
        })
        .await
    }

    /// Run a request and normalize the outcome.
    ///
    /// Never fails: errors become `success: false` with a message safe to
    /// show the caller.
    pub async fn execute(&self, request: OperationRequest) -> OperationResponse {
        match self.dispatch(&request).await {
            Ok(response) => response,
            Err(err) => OperationResponse::failure(&err),
        }
    }

    async fn dispatch(&self, request: &OperationRequest) -> Result<OperationResponse> {
        let user = request.user_id.as_str();
        let provider = request.provider_id.as_str();
        let path = request.file_path.as_str();

        let response = match request.operation {
            Operation::Read => {
                let content = self.read_file(user, provider, path).await?;
                OperationResponse::ok("file read").with_content(content)
            }
            Operation::Write => {
                let content = request.content_bytes()?;
                self.write_file(user, provider, path, &content).await?;
                OperationResponse::ok("file written")
            }
            Operation::Delete => {
                self.delete_file(user, provider, path).await?;
                OperationResponse::ok("file deleted")
            }
            Operation::List => {
                let files = self
                    .list_files(user, provider, path, request.recursive)
                    .await?;
                OperationResponse::ok(format!("{} files", files.len())).with_files(files)
            }
            Operation::Create => {
                self.create_directory(user, provider, path).await?;
                OperationResponse::ok("directory created")
            }
            Operation::Move => {
                let to = destination(request)?;
                self.move_file(user, provider, path, to).await?;
                OperationResponse::ok("file moved")
            }
            Operation::Copy => {
                let to = destination(request)?;
                self.copy_file(user, provider, path, to).await?;
                OperationResponse::ok("file copied")
            }
            Operation::Stat => {
                let metadata = self.stat(user, provider, path).await?;
                OperationResponse::ok("metadata read").with_metadata(metadata)
            }
        };
        Ok(response)
    }

    /// Provider lookup followed by the permission check.
    async fn resolve(&self, op: &Op<'_>, verb: AclOperation, path: &str) -> Result<Arc<dyn StorageProvider>> {
        let provider = self.registry.get(op.provider_id)?;
        self.authorize(op, verb, path).await?;
        tracing::debug!(
            user_id = %op.user_id,
            provider_id = %op.provider_id,
            operation = op.operation,
            path = %sanitize_for_log(path),
            "request routed"
        );
        Ok(provider)
    }

    async fn authorize(&self, op: &Op<'_>, verb: AclOperation, path: &str) -> Result<()> {
        if self.acl.has_access(op.user_id, path, verb).await? {
            return Ok(());
        }
        tracing::warn!(
            user_id = %op.user_id,
            provider_id = %op.provider_id,
            permission = %verb,
            path = %sanitize_for_log(path),
            "access denied"
        );
        Err(Error::AccessDenied(format!(
            "user '{}' lacks {} permission for '{}'",
            op.user_id, verb, path
        )))
    }

    async fn call<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let Some(limit) = self.timeout else {
            return fut.await;
        };
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout_ms = limit.as_millis() as u64, "provider call timed out");
                Err(Error::ProviderUnavailable(format!(
                    "provider call timed out after {}ms",
                    limit.as_millis()
                )))
            }
        }
    }

    async fn audited<T>(&self, op: &Op<'_>, body: impl Future<Output = Result<T>>) -> Result<T> {
        let started = Instant::now();
        let result = body.await.map_err(|e| {
            e.with_context(RequestContext {
                provider_id: op.provider_id.to_string(),
                path: op.path.to_string(),
                operation: op.operation.to_string(),
            })
        });

        self.audit.record(&AuditEvent {
            user_id: op.user_id.to_string(),
            provider_id: op.provider_id.to_string(),
            operation: op.operation.to_string(),
            path: op.path.to_string(),
            destination: op.destination.map(str::to_string),
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.kind().to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        result
    }
}

/// Identity of one routed call, for context and audit.
struct Op<'a> {
    user_id: &'a str,
    provider_id: &'a str,
    operation: &'static str,
    path: &'a str,
    destination: Option<&'a str>,
}

impl<'a> Op<'a> {
    fn new(user_id: &'a str, provider_id: &'a str, operation: &'static str, path: &'a str) -> Self {
        Self {
            user_id,
            provider_id,
            operation,
            path,
            destination: None,
        }
    }

    fn destination(mut self, to: &'a str) -> Self {
        self.destination = Some(to);
        self
    }
}

fn destination(request: &OperationRequest) -> Result<&str> {
    request.destination_path.as_deref().ok_or_else(|| {
        Error::Configuration(format!("{} requires a destination path", request.operation))
    })
}
