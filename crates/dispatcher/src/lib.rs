//! Load-balancing directory for cluster routing.
//!
//! Turns the registry's live instance list into per-route and per-event
//! endpoint pools and answers "which endpoint serves route X".
//!
//! ## Architecture
//!
//! ```text
//! Registry watch ──► Dispatcher::replace_services
//!                          │  (rebuild, then swap under one write lock)
//!                          ▼
//!            routes: id → RoutePool ─┐
//!            events: id → EventPool ─┼─► Pool (state buckets)
//!            endpoints: ins_id → Endpoint  └─► Random | RoundRobin | WeightedRoundRobin
//! ```

pub mod dispatcher;
mod pool;
pub mod route;
pub mod strategy;

pub use dispatcher::Dispatcher;
pub use route::{EventPool, RoutePool};
pub use strategy::BalanceStrategy;
