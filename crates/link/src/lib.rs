//! Outbound routing to gate and node instances.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────── GateLinker ────────────┐
//!  push/multicast │ locate_gate ─► GateLocations cache │
//!  broadcast ...  │      │ miss      (DashMap)         │
//!                 │      ▼                             │
//!                 │   Locator ──► retry-with-eviction  │──► GateClient
//!                 │   Dispatcher (gate endpoints)      │
//!                 └────────────────────────────────────┘
//!
//!                 ┌──────────── NodeLinker ────────────┐
//!  deliver        │ route ─► stateful?  NodeLocations  │
//!  trigger        │            └─ no ─► balanced pick  │──► NodeClient
//!                 │ event ─► fan-out to subscribers    │
//!                 └────────────────────────────────────┘
//!
//!  Registry watch ──► Dispatcher::replace_services
//!  Locator watch  ──► location cache bind/unbind
//! ```
//!
//! Messages are packed once into a pooled buffer and shared across a fan-out
//! through counted leases; the buffer returns to the pool when the last lease
//! is dropped.

pub mod client;
pub mod config;
mod discovery;
pub mod fanout;
pub mod gate;
pub mod location;
pub mod node;
pub mod retry;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::ClientPool;
pub use config::{LinkConfig, LinkOptions};
pub use gate::GateLinker;
pub use location::{ApplyLocation, GateLocations, NodeLocations};
pub use node::NodeLinker;
pub use types::{
    BroadcastArgs, DeliverArgs, DisconnectArgs, MulticastArgs, PublishArgs, PushArgs, SessionArgs,
    SubscribeArgs, TriggerArgs,
};
