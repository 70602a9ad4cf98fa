//! Registry backend boundary.
//!
//! The engine consumes a small slice of a hierarchical registry
//! (ZooKeeper-style): existence/children/data reads that can arm one-shot
//! watches, plus create/delete for publishing local endpoints. Watch
//! delivery is at-least-once and may duplicate; reads and events race
//! freely, so consumers tolerate `NoNode` in the gaps.

mod mem;
pub use mem::*;


use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::RegistryError;

/// Callback armed on a read, fired at most once per registration from an
/// arbitrary task or thread. Implementations must only enqueue.
pub type WatchObserver = Arc<dyn Fn(RegistryEvent) + Send + Sync>;

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEvent {
    pub path: String,
    pub kind: RegistryEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEventKind {
    Created,
    Deleted,
    ChildrenChanged,
    DataChanged,
    /// Session-state transition; `path` is empty
    Session,
}

impl RegistryEvent {
    pub(crate) fn session() -> Self {
        RegistryEvent {
            path: String::new(),
            kind: RegistryEventKind::Session,
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegistryBackend: Send + Sync + 'static {
    /// Existence check. The watch (when armed) fires on create, delete or
    /// data change of `path`, whether or not the node exists yet.
    async fn exists(
        &self,
        path: &str,
        watch: Option<WatchObserver>,
    ) -> RegistryResult<bool>;

    /// Child names (not paths) of `path`. The watch fires when the child
    /// set changes or the node is deleted.
    async fn get_children(
        &self,
        path: &str,
        watch: Option<WatchObserver>,
    ) -> RegistryResult<Vec<String>>;

    /// Node payload. The watch fires on data change or delete.
    async fn get_data(
        &self,
        path: &str,
        watch: Option<WatchObserver>,
    ) -> RegistryResult<Vec<u8>>;

    /// Create a node under an existing parent. Ephemeral nodes disappear
    /// with the session that created them.
    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        ephemeral: bool,
    ) -> RegistryResult<()>;

    /// Create every missing ancestor of `path` (inclusive) with empty data.
    async fn ensure_path(
        &self,
        path: &str,
    ) -> RegistryResult<()>;

    async fn delete(
        &self,
        path: &str,
    ) -> RegistryResult<()>;

    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
    ) -> RegistryResult<()>;
}
