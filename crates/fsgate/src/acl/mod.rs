//! Access control.
//!
//! Users hold string grants such as `read:docs` or `*`, kept in a
//! [`PermissionStore`]. [`AccessControl`] caches them per user and answers
//! `has_access` checks for the router. See [`Permission`] for the grammar.

mod evaluator;
mod permission;
mod store;

pub use evaluator::{AccessControl, DEFAULT_ACL_TTL};
pub use permission::{AclOperation, Permission, PermissionRecord, normalize_path};
pub use store::{InMemoryPermissionStore, PermissionStore};
