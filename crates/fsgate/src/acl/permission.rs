//! Permission grammar and matching.
//!
//! A permission is `<op>` or `<op>:<prefix>`. `op` is an operation verb or
//! `*`. An empty prefix, `*` or `/` covers the whole provider namespace.
//! Otherwise the prefix must match the requested path at a component
//! boundary: `docs` covers `docs` and `docs/a.txt` but not `docs2/a.txt`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Operation verbs an ACL entry can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclOperation {
    Read,
    Write,
    Delete,
    List,
    Create,
}

impl AclOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AclOperation::Read => "read",
            AclOperation::Write => "write",
            AclOperation::Delete => "delete",
            AclOperation::List => "list",
            AclOperation::Create => "create",
        }
    }
}

impl fmt::Display for AclOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AclOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(AclOperation::Read),
            "write" => Ok(AclOperation::Write),
            "delete" => Ok(AclOperation::Delete),
            "list" => Ok(AclOperation::List),
            "create" => Ok(AclOperation::Create),
            other => Err(Error::Configuration(format!("unknown operation: {}", other))),
        }
    }
}

/// A stored grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRecord {
    pub username: String,
    pub permission: String,
    pub granted_at: DateTime<Utc>,
}

/// Parsed permission string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    /// `None` matches every operation
    operation: Option<AclOperation>,
    /// `None` matches every path; otherwise a normalized prefix
    prefix: Option<String>,
}

impl Permission {
    /// Parse `<op>` or `<op>:<prefix>`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (op, prefix) = match raw.split_once(':') {
            Some((op, prefix)) => (op.trim(), prefix.trim()),
            None => (raw, ""),
        };

        let operation = match op {
            "*" => None,
            "" => {
                return Err(Error::Configuration(format!(
                    "permission '{}' has no operation",
                    raw
                )));
            }
            verb => Some(verb.parse::<AclOperation>()?),
        };

        let prefix = match prefix.trim_end_matches("/*") {
            "" | "*" | "/" => None,
            p => Some(normalize_path(p).ok_or_else(|| {
                Error::Configuration(format!("permission prefix '{}' escapes the root", p))
            })?),
        };
        // "/*" trims to "" above; a bare "docs/" normalizes to "docs"
        let prefix = prefix.filter(|p| !p.is_empty());

        Ok(Self { operation, prefix })
    }

    /// Whether this permission grants `operation` on `path`.
    ///
    /// `path` must already be normalized with [`normalize_path`].
    pub fn allows(&self, operation: AclOperation, path: &str) -> bool {
        if self.operation.is_some_and(|op| op != operation) {
            return false;
        }
        match &self.prefix {
            None => true,
            Some(prefix) => {
                path == prefix
                    || (path.starts_with(prefix.as_str())
                        && path.as_bytes().get(prefix.len()) == Some(&b'/'))
            }
        }
    }
}

/// Canonical form: lowercase verb (or `*`), then `:prefix` when one is set.
/// Equivalent spellings such as `read:docs`, `READ:/docs/` and `read:docs/*`
/// all display as `read:docs`.
impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            Some(op) => f.write_str(op.as_str())?,
            None => f.write_str("*")?,
        }
        if let Some(prefix) = &self.prefix {
            write!(f, ":{}", prefix)?;
        }
        Ok(())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Lexically normalize a request path for ACL matching.
///
/// Separators are unified to `/`, leading and trailing slashes dropped, `.`
/// removed and `..` applied. Returns `None` if `..` climbs above the root.
pub fn normalize_path(path: &str) -> Option<String> {
    let unified = path.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for component in unified.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            name => parts.push(name),
        }
    }
    Some(parts.join("/"))
}
