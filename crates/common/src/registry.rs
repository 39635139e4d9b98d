//! Service instances and the registry that publishes them.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cluster role of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Gate,
    Node,
    Mesh,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Gate => "gate",
            Kind::Node => "node",
            Kind::Mesh => "mesh",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gate" => Ok(Kind::Gate),
            "node" => Ok(Kind::Node),
            "mesh" => Ok(Kind::Mesh),
            other => Err(Error::InvalidKind(other.to_string())),
        }
    }
}

/// Lifecycle state reported by an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Work,
    Busy,
    Hang,
    Shut,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Work => "work",
            State::Busy => "busy",
            State::Hang => "hang",
            State::Shut => "shut",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "work" => Ok(State::Work),
            "busy" => Ok(State::Busy),
            "hang" => Ok(State::Hang),
            "shut" => Ok(State::Shut),
            other => Err(Error::InvalidState(other.to_string())),
        }
    }
}

/// A route served by an instance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Route {
    pub id: i32,
    /// Must be handled by the instance the user is bound to.
    #[serde(default)]
    pub stateful: bool,
    /// Not callable from gate-side linkers.
    #[serde(default)]
    pub internal: bool,
    /// Binding group the route belongs to (e.g. "game", "chat").
    #[serde(default)]
    pub group: String,
}

/// A registered instance as published by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub kind: Kind,
    #[serde(default)]
    pub alias: String,
    pub state: State,
    #[serde(default)]
    pub events: Vec<i32>,
    #[serde(default)]
    pub routes: Vec<Route>,
    pub endpoint: String,
    #[serde(default)]
    pub weight: i32,
}

/// Service discovery backend.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Current instances of the given kind.
    async fn services(&self, kind: Kind) -> Result<Vec<ServiceInstance>>;

    /// Open a change stream for instances of the given kind.
    async fn watch(&self, kind: Kind) -> Result<Box<dyn RegistryWatcher>>;
}

/// Change stream opened by [`Registry::watch`].
///
/// Every `next` yields the full, latest instance list.
#[async_trait]
pub trait RegistryWatcher: Send {
    async fn next(&mut self) -> Result<Vec<ServiceInstance>>;

    async fn stop(&mut self) -> Result<()>;
}
