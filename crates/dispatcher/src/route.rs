//! Route and event endpoint pools.

use crate::pool::Pool;
use crate::strategy::BalanceStrategy;
use common::{Endpoint, Result, State};

/// Endpoints serving one route id, plus the route's routing attributes.
#[derive(Debug)]
pub struct RoutePool {
    id: i32,
    group: String,
    stateful: bool,
    internal: bool,
    pool: Pool,
}

impl RoutePool {
    pub(crate) fn new(id: i32, group: &str, stateful: bool, internal: bool, strategy: BalanceStrategy) -> Self {
        Self {
            id,
            group: group.to_string(),
            stateful,
            internal,
            pool: Pool::new(strategy),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Binding group used to locate the owning node of a stateful route.
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn stateful(&self) -> bool {
        self.stateful
    }

    pub fn internal(&self) -> bool {
        self.internal
    }

    /// Pinned lookup when `ins_id` is given, balanced pick otherwise.
    pub fn find_endpoint(&self, ins_id: Option<&str>) -> Result<Endpoint> {
        self.pool.find_endpoint(ins_id)
    }

    pub fn contains(&self, ins_id: &str) -> bool {
        self.pool.contains(ins_id)
    }

    pub fn state_of(&self, ins_id: &str) -> Option<State> {
        self.pool.state_of(ins_id)
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn pool_mut(&mut self) -> &mut Pool {
        &mut self.pool
    }

    #[cfg(test)]
    pub(crate) fn instance_ids(&self) -> Vec<String> {
        self.pool.members().into_iter().map(|(id, _)| id).collect()
    }
}

/// Endpoints subscribed to one event id.
#[derive(Debug)]
pub struct EventPool {
    id: i32,
    pool: Pool,
}

impl EventPool {
    pub(crate) fn new(id: i32, strategy: BalanceStrategy) -> Self {
        Self {
            id,
            pool: Pool::new(strategy),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn find_endpoint(&self, ins_id: Option<&str>) -> Result<Endpoint> {
        self.pool.find_endpoint(ins_id)
    }

    /// Every subscribed instance as `(instance id, endpoint)`.
    pub fn endpoints(&self) -> Vec<(String, Endpoint)> {
        self.pool.members()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn pool_mut(&mut self) -> &mut Pool {
        &mut self.pool
    }
}
