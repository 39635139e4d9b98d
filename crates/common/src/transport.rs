//! Role-specific transport client capabilities.
//!
//! Gate and node clients expose different RPC sets, so they are separate traits.
//! Per-user calls return [`Outcome::Miss`] when the target no longer holds the user.

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::registry::State;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Session addressing mode on a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Addressed by connection id; only meaningful on one gate.
    Conn,
    /// Addressed by user id; resolvable through the locator.
    User,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Conn => f.write_str("conn"),
            SessionKind::User => f.write_str("user"),
        }
    }
}

/// Result of a per-user RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    /// The target instance does not currently hold that session.
    Miss,
}

impl<T> Outcome<T> {
    pub fn is_miss(&self) -> bool {
        matches!(self, Outcome::Miss)
    }

    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(value) => Some(value),
            Outcome::Miss => None,
        }
    }
}

#[async_trait]
pub trait GateClient: Send + Sync {
    async fn bind(&self, cid: i64, uid: i64) -> Result<Outcome<()>>;

    async fn unbind(&self, uid: i64) -> Result<Outcome<()>>;

    async fn get_ip(&self, kind: SessionKind, target: i64) -> Result<Outcome<String>>;

    /// Number of sessions of the given kind on this gate.
    async fn stat(&self, kind: SessionKind) -> Result<u64>;

    async fn is_online(&self, kind: SessionKind, target: i64) -> Result<Outcome<bool>>;

    async fn disconnect(&self, kind: SessionKind, target: i64, force: bool) -> Result<Outcome<()>>;

    async fn push(&self, kind: SessionKind, target: i64, message: &[u8]) -> Result<Outcome<()>>;

    /// Returns the number of sessions the message reached.
    async fn multicast(&self, kind: SessionKind, targets: &[i64], message: &[u8]) -> Result<u64>;

    async fn broadcast(&self, kind: SessionKind, message: &[u8]) -> Result<u64>;

    async fn publish(&self, channel: &str, message: &[u8]) -> Result<u64>;

    async fn subscribe(&self, kind: SessionKind, targets: &[i64], channel: &str) -> Result<()>;

    async fn unsubscribe(&self, kind: SessionKind, targets: &[i64], channel: &str) -> Result<()>;
}

#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn trigger(&self, event: i32, cid: i64, uid: i64) -> Result<Outcome<()>>;

    async fn deliver(&self, cid: i64, uid: i64, message: &[u8]) -> Result<Outcome<()>>;

    async fn get_state(&self) -> Result<State>;

    async fn set_state(&self, state: State) -> Result<()>;
}

/// Creates clients for an endpoint. Linkers pool what it returns per address.
pub trait ClientBuilder<C: ?Sized>: Send + Sync {
    fn build(&self, endpoint: &Endpoint) -> Result<Arc<C>>;
}
