//! Provider-root containment for request paths.
//!
//! Every path-accepting provider operation resolves its input through
//! [`PathSandbox`] before touching the backend. Resolution joins first and
//! canonicalizes second, so `..` segments are evaluated against the real
//! root rather than stripped from the input:
//!
//! 1. The root is canonicalized once, when the sandbox is built.
//! 2. Separators in the request path are normalized to `/`.
//! 3. Root and request are joined, then `.`/`..` are resolved. Disk backends
//!    additionally resolve symlinks of the deepest existing ancestor.
//! 4. The result must have the root as a component prefix, compared with the
//!    backend's case sensitivity.
//! 5. Only the returned path may be handed to the backend.
//!
//! Any violation is [`Error::AccessDenied`]. Inputs are never truncated or
//! silently corrected into the root.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Resolves request-relative paths into backend paths under a fixed root.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
    case_sensitive: bool,
}

impl PathSandbox {
    /// Sandbox rooted at an existing directory on local disk.
    ///
    /// The root is canonicalized here and cached for the sandbox's lifetime.
    pub fn on_disk(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let canonical = std::fs::canonicalize(root).map_err(|e| {
            Error::Configuration(format!("cannot resolve provider root: {}", e))
        })?;
        Ok(Self {
            root: canonical,
            case_sensitive: default_case_sensitivity(),
        })
    }

    /// Sandbox over a virtual namespace (no symlinks, always case-sensitive).
    ///
    /// The root must be absolute; it is normalized lexically.
    pub fn virtual_root(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.has_root() {
            return Err(Error::Configuration(
                "virtual provider root must be absolute".to_string(),
            ));
        }
        let mut normalized = PathBuf::new();
        for component in root.components() {
            match component {
                Component::RootDir => normalized.push("/"),
                Component::Normal(name) => normalized.push(name),
                Component::ParentDir => {
                    normalized.pop();
                }
                Component::CurDir | Component::Prefix(_) => {}
            }
        }
        Ok(Self {
            root: normalized,
            case_sensitive: true,
        })
    }

    /// Sandbox over a whole virtual namespace rooted at `/`.
    pub fn namespace_root() -> Self {
        Self {
            root: PathBuf::from("/"),
            case_sensitive: true,
        }
    }

    /// Override case sensitivity of the containment comparison.
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Canonical root of this sandbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether containment compares path components case-sensitively.
    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Resolve a request path lexically and check containment.
    pub fn resolve(&self, request_path: &str) -> Result<PathBuf> {
        let normalized = request_path.replace('\\', "/");
        let mut joined = self.root.clone();

        for component in Path::new(&normalized).components() {
            match component {
                Component::Normal(name) => joined.push(name),
                Component::ParentDir => {
                    if !joined.pop() {
                        return Err(escape_error(request_path));
                    }
                }
                // Leading separators do not make a request absolute.
                Component::RootDir | Component::CurDir => {}
                Component::Prefix(_) => return Err(escape_error(request_path)),
            }
        }

        self.ensure_contained(&joined, request_path)?;
        Ok(joined)
    }

    /// Resolve a request path and follow symlinks on disk.
    ///
    /// The deepest existing ancestor of the lexical result is canonicalized
    /// and the remaining components re-appended, so a symlink inside the root
    /// that points outside of it is rejected even if the target file does
    /// not exist yet.
    pub async fn resolve_on_disk(&self, request_path: &str) -> Result<PathBuf> {
        let lexical = self.resolve(request_path)?;

        let mut existing = lexical.as_path();
        let mut remainder: Vec<&std::ffi::OsStr> = Vec::new();
        let canonical_base = loop {
            match tokio::fs::canonicalize(existing).await {
                Ok(canonical) => break canonical,
                Err(_) => {
                    // Dangling symlink: its target cannot be checked
                    if tokio::fs::symlink_metadata(existing).await.is_ok() {
                        return Err(escape_error(request_path));
                    }
                    match (existing.file_name(), existing.parent()) {
                        (Some(name), Some(parent)) => {
                            remainder.push(name);
                            existing = parent;
                        }
                        // Nothing above the root exists; the root itself was
                        // canonicalized at build time.
                        _ => break self.root.clone(),
                    }
                }
            }
        };

        let mut resolved = canonical_base;
        for name in remainder.iter().rev() {
            resolved.push(name);
        }

        self.ensure_contained(&resolved, request_path)?;
        Ok(resolved)
    }

    /// Path of `resolved` relative to the root, `/`-separated.
    ///
    /// Returns `None` when `resolved` is outside the root.
    pub fn relative(&self, resolved: &Path) -> Option<String> {
        if !self.is_contained(resolved) {
            return None;
        }
        let parts: Vec<String> = resolved
            .components()
            .skip(self.root.components().count())
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    fn ensure_contained(&self, resolved: &Path, request_path: &str) -> Result<()> {
        if self.is_contained(resolved) {
            Ok(())
        } else {
            Err(escape_error(request_path))
        }
    }

    fn is_contained(&self, candidate: &Path) -> bool {
        let mut candidate_components = candidate.components();
        for root_component in self.root.components() {
            match candidate_components.next() {
                Some(c) if self.component_eq(root_component, c) => {}
                _ => return false,
            }
        }
        true
    }

    fn component_eq(&self, a: Component<'_>, b: Component<'_>) -> bool {
        if self.case_sensitive {
            a == b
        } else {
            a.as_os_str().to_string_lossy().to_lowercase()
                == b.as_os_str().to_string_lossy().to_lowercase()
        }
    }
}

fn escape_error(request_path: &str) -> Error {
    Error::AccessDenied(format!("path '{}' escapes provider root", request_path))
}

/// Case sensitivity of local disk on the current platform.
pub fn default_case_sensitivity() -> bool {
    !cfg!(any(target_os = "windows", target_os = "macos"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn tenant() -> PathSandbox {
        PathSandbox::virtual_root("/data/tenantA").unwrap()
    }

    #[test]
    fn test_simple_join() {
        let sb = tenant();
        assert_eq!(
            sb.resolve("docs/a.txt").unwrap(),
            PathBuf::from("/data/tenantA/docs/a.txt")
        );
    }

    #[test]
    fn test_traversal_denied() {
        let sb = tenant();
        let err = sb.resolve("../../etc/passwd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert!(!err.to_string().contains("/data"));
    }

    #[test]
    fn test_sibling_tenant_denied() {
        let sb = tenant();
        assert!(sb.resolve("../tenantB/secret").is_err());
        // Shares a string prefix with the root but is a different directory
        assert!(sb.resolve("../tenantAB/secret").is_err());
    }

    #[test]
    fn test_inner_parent_refs_allowed() {
        let sb = tenant();
        assert_eq!(
            sb.resolve("docs/../notes/./b.txt").unwrap(),
            PathBuf::from("/data/tenantA/notes/b.txt")
        );
        assert_eq!(
            sb.resolve("x/../../tenantA/y").unwrap(),
            PathBuf::from("/data/tenantA/y")
        );
    }

    #[test]
    fn test_absolute_input_is_relative_to_root() {
        let sb = tenant();
        assert_eq!(
            sb.resolve("/etc/passwd").unwrap(),
            PathBuf::from("/data/tenantA/etc/passwd")
        );
    }

    #[test]
    fn test_backslash_separators() {
        let sb = tenant();
        assert!(sb.resolve("..\\..\\etc\\passwd").is_err());
        assert_eq!(
            sb.resolve("docs\\a.txt").unwrap(),
            PathBuf::from("/data/tenantA/docs/a.txt")
        );
    }

    #[test]
    fn test_root_itself() {
        let sb = tenant();
        assert_eq!(sb.resolve("").unwrap(), PathBuf::from("/data/tenantA"));
        assert_eq!(sb.resolve("/").unwrap(), PathBuf::from("/data/tenantA"));
        assert_eq!(sb.resolve("./").unwrap(), PathBuf::from("/data/tenantA"));
    }

    #[test]
    fn test_escape_above_filesystem_root() {
        let sb = PathSandbox::virtual_root("/").unwrap();
        assert!(sb.resolve("../etc").is_err());
        assert_eq!(sb.resolve("etc").unwrap(), PathBuf::from("/etc"));
    }

    #[test]
    fn test_relative() {
        let sb = tenant();
        let resolved = sb.resolve("docs/a.txt").unwrap();
        assert_eq!(sb.relative(&resolved).unwrap(), "docs/a.txt");
        assert_eq!(sb.relative(Path::new("/data/other")), None);
    }

    #[test]
    fn test_case_insensitive_comparison() {
        let sb = tenant().case_sensitive(false);
        assert!(sb.is_contained(Path::new("/DATA/TenantA/x")));
        let sb = tenant().case_sensitive(true);
        assert!(!sb.is_contained(Path::new("/DATA/TenantA/x")));
    }

    #[test]
    fn test_virtual_root_must_be_absolute() {
        assert!(PathSandbox::virtual_root("data").is_err());
    }

    #[tokio::test]
    async fn test_on_disk_missing_file_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let sb = PathSandbox::on_disk(dir.path()).unwrap();
        let resolved = sb.resolve_on_disk("new/deep/file.txt").await.unwrap();
        assert!(resolved.starts_with(sb.root()));
        assert!(resolved.ends_with("new/deep/file.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_on_disk_symlink_escape_denied() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let sb = PathSandbox::on_disk(dir.path()).unwrap();
        let err = sb.resolve_on_disk("link/secret.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_on_disk_dangling_symlink_denied() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("later.txt"), dir.path().join("link"))
            .unwrap();

        let sb = PathSandbox::on_disk(dir.path()).unwrap();
        assert!(sb.resolve_on_disk("link").await.is_err());
    }
}
