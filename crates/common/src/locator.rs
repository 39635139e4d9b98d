//! User location store interface.

use crate::error::Result;
use crate::registry::Kind;
use async_trait::async_trait;

/// Whether a location event binds or unbinds a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationEventKind {
    Bind,
    Unbind,
}

/// A bind/unbind change reported by [`LocatorWatcher::next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationEvent {
    pub uid: i64,
    pub kind: LocationEventKind,
    pub instance_id: String,
    pub instance_kind: Kind,
    /// Binding group for node instances; empty for gates.
    pub instance_group: String,
}

/// Authoritative user → instance location store.
///
/// `locate_*` return `None` when the user has no binding.
#[async_trait]
pub trait Locator: Send + Sync {
    async fn locate_gate(&self, uid: i64) -> Result<Option<String>>;

    async fn bind_gate(&self, uid: i64, gid: &str) -> Result<()>;

    async fn unbind_gate(&self, uid: i64, gid: &str) -> Result<()>;

    async fn locate_node(&self, uid: i64, group: &str) -> Result<Option<String>>;

    async fn bind_node(&self, uid: i64, group: &str, nid: &str) -> Result<()>;

    async fn unbind_node(&self, uid: i64, group: &str, nid: &str) -> Result<()>;

    async fn watch(&self, kinds: &[Kind]) -> Result<Box<dyn LocatorWatcher>>;
}

/// Change stream opened by [`Locator::watch`].
#[async_trait]
pub trait LocatorWatcher: Send {
    async fn next(&mut self) -> Result<Vec<LocationEvent>>;

    async fn stop(&mut self) -> Result<()>;
}
